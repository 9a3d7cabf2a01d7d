//! Group assignment: places a joining student into a group of a battle.
//!
//! Joining is idempotent per (battle, student). The membership row's unique
//! key is what guarantees a student lands in at most one group, so a retried
//! join that loses an insert race still resolves to the existing membership.

use spacetimedb::Timestamp;

use crate::codes::normalize_code;
use crate::error::{BattleError, Result};
use crate::store::{member_key, BattleStore};
use crate::{Battle, BattleGroup, BattleStatus, GroupMember, OverflowPolicy};

#[derive(Debug, Clone)]
pub struct Membership {
    pub member: GroupMember,
    pub group: BattleGroup,
    /// False when the student was already a member and nothing was written
    pub created: bool,
}

/// Join a battle by code; the group is chosen by capacity.
pub fn join_battle(
    store: &mut dyn BattleStore,
    battle_code: &str,
    student_id: &str,
    display_name: &str,
    now: Timestamp,
) -> Result<Membership> {
    let battle = find_battle(store, battle_code)?;
    if let Some(existing) = existing_membership(store, &battle, student_id)? {
        return Ok(existing);
    }
    require_waiting(&battle)?;

    let group = pick_group(store, &battle)?;
    admit(store, &battle, group, student_id, display_name, now)
}

/// Join a specific group by its code. Never overflows.
pub fn join_group(
    store: &mut dyn BattleStore,
    battle_code: &str,
    group_code: &str,
    student_id: &str,
    display_name: &str,
    now: Timestamp,
) -> Result<Membership> {
    let battle = find_battle(store, battle_code)?;
    if let Some(existing) = existing_membership(store, &battle, student_id)? {
        return Ok(existing);
    }
    require_waiting(&battle)?;

    let group_code = normalize_code(group_code);
    let group = store
        .groups(battle.id)
        .into_iter()
        .find(|g| g.code == group_code)
        .ok_or_else(|| BattleError::not_found("group", &group_code))?;

    if !has_room(store, &battle, &group) {
        log::warn!("[JOIN] group {} of battle {} is full", group.code, battle.code);
        return Err(BattleError::Full(format!("group {}", group.code)));
    }
    admit(store, &battle, group, student_id, display_name, now)
}

/// The group `student_id` answers for, or `Unauthorized`.
pub fn require_member(
    store: &dyn BattleStore,
    group: &BattleGroup,
    student_id: &str,
) -> Result<GroupMember> {
    match store.membership(group.battle_id, student_id) {
        Some(member) if member.group_id == group.id => Ok(member),
        _ => Err(BattleError::Unauthorized(format!(
            "student {} is not in group {}",
            student_id, group.id
        ))),
    }
}

/// The battle's teacher or any student in one of its groups
pub fn require_participant(
    store: &dyn BattleStore,
    battle: &Battle,
    caller_id: &str,
) -> Result<()> {
    if battle.teacher_id == caller_id || store.membership(battle.id, caller_id).is_some() {
        return Ok(());
    }
    Err(BattleError::Unauthorized(format!(
        "{} is not part of battle {}",
        caller_id, battle.id
    )))
}

fn find_battle(store: &dyn BattleStore, code: &str) -> Result<Battle> {
    let code = normalize_code(code);
    store.battle_by_code(&code).ok_or_else(|| {
        log::warn!("[JOIN] battle code {} does not exist", code);
        BattleError::not_found("battle", &code)
    })
}

fn require_waiting(battle: &Battle) -> Result<()> {
    if battle.status != BattleStatus::Waiting {
        return Err(BattleError::InvalidTransition(format!(
            "battle {} is {:?}, joining is closed",
            battle.code, battle.status
        )));
    }
    Ok(())
}

fn existing_membership(
    store: &dyn BattleStore,
    battle: &Battle,
    student_id: &str,
) -> Result<Option<Membership>> {
    let Some(member) = store.membership(battle.id, student_id) else {
        return Ok(None);
    };
    let group = store
        .group(member.group_id)
        .ok_or_else(|| BattleError::not_found("group", member.group_id))?;
    log::debug!(
        "[JOIN] repeat join battle:{} student:{} group:{}",
        battle.id,
        student_id,
        group.id
    );
    Ok(Some(Membership {
        member,
        group,
        created: false,
    }))
}

fn has_room(store: &dyn BattleStore, battle: &Battle, group: &BattleGroup) -> bool {
    !group.is_full && (store.members(group.id).len() as u32) < battle.group_size
}

/// First group in creation order with room; the overflow policy decides
/// what happens when there is none.
fn pick_group(store: &dyn BattleStore, battle: &Battle) -> Result<BattleGroup> {
    let groups = store.groups(battle.id);
    if let Some(open) = groups.iter().find(|g| has_room(store, battle, g)) {
        return Ok(open.clone());
    }

    match battle.overflow_policy {
        OverflowPolicy::Reject => {
            log::warn!("[JOIN] battle {} is full ({} groups)", battle.code, groups.len());
            Err(BattleError::Full(format!("battle {}", battle.code)))
        }
        OverflowPolicy::FirstGroup => {
            let first = groups
                .into_iter()
                .next()
                .ok_or_else(|| BattleError::not_found("group", format!("battle {}", battle.id)))?;
            log::warn!("[JOIN] battle {} is full, overflowing into {}", battle.code, first.name);
            Ok(first)
        }
    }
}

fn admit(
    store: &mut dyn BattleStore,
    battle: &Battle,
    mut group: BattleGroup,
    student_id: &str,
    display_name: &str,
    now: Timestamp,
) -> Result<Membership> {
    let inserted = store.insert_member(GroupMember {
        id: 0,
        group_id: group.id,
        battle_id: battle.id,
        member_key: member_key(battle.id, student_id),
        student_id: student_id.to_string(),
        display_name: display_name.trim().to_string(),
        joined_at: now,
    });

    let member = match inserted {
        Ok(member) => member,
        Err(_) => {
            // Lost a race with our own retry: the other insert won
            return existing_membership(store, battle, student_id)?.ok_or_else(|| {
                BattleError::AlreadyJoined {
                    battle_id: battle.id,
                    student_id: student_id.to_string(),
                }
            });
        }
    };

    let count = store.members(group.id).len() as u32;
    if count >= battle.group_size && !group.is_full {
        group.is_full = true;
        group = store.update_group(group);
    }

    log::info!(
        "[JOIN] battle:{} group:{} student:{} members:{}/{}",
        battle.code,
        group.name,
        member.display_name,
        count,
        battle.group_size
    );
    Ok(Membership {
        member,
        group,
        created: true,
    })
}
