use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp,
    table, reducer, view, SpacetimeType,
};

pub mod assignment;
pub mod clock;
pub mod codes;
pub mod config;
pub mod error;
pub mod finalize;
pub mod import;
pub mod progression;
pub mod setup;
pub mod store;
pub mod submission;

use config::CONFIG_ID;
use error::BattleError;
use progression::Readiness;
use setup::NewBattle;
use store::{BattleStore, TableLedger, TableStore};
use submission::Submission;

// ==================== TYPES ====================

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum BattleStatus {
    Waiting,
    Active,
    Finished,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum ProgressionMode {
    /// One shared question pointer, moved by the teacher or auto-advance
    Lockstep,
    /// Every group has its own pointer
    SelfPaced,
}

/// What `join_battle` does once every group is at capacity
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum OverflowPolicy {
    Reject,
    /// Put the student in the first group anyway
    FirstGroup,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct AnswerOption {
    pub text: String,
    /// Tile color shown to students
    pub color: String,
}

// ==================== TABLES ====================

/// Authorized identities that can call admin reducers
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Engine tuning, single row with id = CONFIG_ID
/// PUBLIC: clients read the delays and poll interval they must honor
#[table(name = engine_config, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    #[primary_key]
    pub id: u32,

    pub base_score: u32,
    pub floor_score: u32,

    /// Wrong answers before a group is eliminated
    pub elimination_threshold: u32,

    /// Payout by rank among non-eliminated groups
    pub payout_table: Vec<u32>,
    pub fallback_payout: u32,
    pub eliminated_payout: u32,

    pub results_delay_ms: u32,
    pub self_paced_delay_ms: u32,
    pub poll_interval_ms: u32,

    pub code_length: u32,
    pub code_attempts: u32,
}

/// A quiz battle owned by one teacher
#[table(name = battle, public)]
#[derive(Clone, Debug)]
pub struct Battle {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,

    /// Identity hex of the teacher who created it
    #[index(btree)]
    pub teacher_id: String,

    /// Join code students type in
    #[unique]
    pub code: String,

    pub mode: ProgressionMode,
    pub status: BattleStatus,

    pub question_count: u32,
    pub group_size: u32,

    /// Seconds per lockstep question, 0 = untimed
    pub time_limit_secs: u32,

    pub overflow_policy: OverflowPolicy,

    /// Lockstep: 0-based position of the current question.
    /// Equals question_count once finished.
    pub question_pointer: u32,

    /// When the current lockstep question was shown
    pub question_started_at: Option<Timestamp>,

    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// A team inside a battle; score and elimination live here
#[table(name = battle_group, public)]
#[derive(Clone, Debug)]
pub struct BattleGroup {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub battle_id: u64,

    /// "{battle_id}:{code}"
    #[unique]
    pub group_key: String,

    pub code: String,
    pub name: String,

    pub is_full: bool,

    pub score: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,

    /// Latches once wrong_answers reaches the threshold
    pub eliminated: bool,

    /// Self-paced: position of the group's current question
    pub question_pointer: u32,
}

#[table(name = group_member, public)]
#[derive(Clone, Debug)]
pub struct GroupMember {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub group_id: u64,

    #[index(btree)]
    pub battle_id: u64,

    /// "{battle_id}:{student_id}", at most one group per battle
    #[unique]
    pub member_key: String,

    #[index(btree)]
    pub student_id: String,

    pub display_name: String,
    pub joined_at: Timestamp,
}

#[table(name = question, public)]
#[derive(Clone, Debug)]
pub struct Question {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub battle_id: u64,

    /// "{battle_id}:{position}"
    #[unique]
    pub question_key: String,

    pub prompt: String,
    pub answers: Vec<AnswerOption>,
    pub correct_index: u32,

    /// 0-based display order
    pub position: u32,
}

/// One group's answer to one question
#[table(name = answer, public)]
#[derive(Clone, Debug)]
pub struct Answer {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub battle_id: u64,

    #[index(btree)]
    pub group_id: u64,

    #[index(btree)]
    pub question_id: u64,

    /// "{question_id}:{group_id}", first answer wins
    #[unique]
    pub answer_key: String,

    /// None = ran out of time
    pub chosen_index: Option<u32>,
    pub is_correct: bool,
    pub response_ms: u32,
    pub submitted_at: Timestamp,
}

/// Proof a student was paid for a group; guards against double credit
#[table(name = payout_receipt, public)]
#[derive(Clone, Debug)]
pub struct PayoutReceipt {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// "{battle_id}:{group_id}:{student_id}"
    #[unique]
    pub receipt_key: String,

    #[index(btree)]
    pub battle_id: u64,

    pub group_id: u64,
    pub student_id: String,
    pub amount: u32,
    pub paid_at: Timestamp,
}

/// Reward points a student has earned in one teacher's battles
#[table(name = points_tally, public)]
#[derive(Clone, Debug)]
pub struct PointsTally {
    /// "{student_id}:{teacher_id}"
    #[primary_key]
    pub tally_key: String,

    #[index(btree)]
    pub student_id: String,

    pub teacher_id: String,
    pub total: u32,
    pub updated_at: Timestamp,
}

// ==================== VIEWS ====================

/// View: the caller's memberships across battles
#[view(name = my_memberships, public)]
fn my_memberships(ctx: &spacetimedb::ViewContext) -> Vec<GroupMember> {
    let student_id = ctx.sender.to_hex().to_string();
    ctx.db.group_member().student_id().filter(&student_id).collect()
}

/// View: answer progress on the current question of every running lockstep
/// battle the caller owns or plays in. Clients poll this to drive the
/// all-answered countdown before calling `auto_advance`.
#[view(name = my_battle_progress, public)]
fn my_battle_progress(ctx: &spacetimedb::ViewContext) -> Vec<Readiness> {
    let caller = ctx.sender.to_hex().to_string();
    let mut battle_ids: Vec<u64> = ctx
        .db
        .group_member()
        .student_id()
        .filter(&caller)
        .map(|m| m.battle_id)
        .collect();
    battle_ids.extend(ctx.db.battle().teacher_id().filter(&caller).map(|b| b.id));
    battle_ids.sort_unstable();
    battle_ids.dedup();

    battle_ids
        .into_iter()
        .filter_map(|id| ctx.db.battle().id().find(&id))
        .filter(|b| b.status == BattleStatus::Active && b.mode == ProgressionMode::Lockstep)
        .filter_map(|battle| {
            let question = ctx
                .db
                .question()
                .battle_id()
                .filter(&battle.id)
                .find(|q| q.position == battle.question_pointer)?;
            let groups: Vec<BattleGroup> =
                ctx.db.battle_group().battle_id().filter(&battle.id).collect();
            let answers: Vec<Answer> =
                ctx.db.answer().question_id().filter(&question.id).collect();
            Some(progression::tally_readiness(&battle, &groups, &answers))
        })
        .collect()
}

// ==================== HELPER FUNCTIONS ====================

/// Stable id for the calling identity
fn caller_id(ctx: &ReducerContext) -> String {
    ctx.sender.to_hex().to_string()
}

fn is_authorized_worker(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

/// Map an engine result onto a reducer result.
///
/// Recoverable errors (lost races, repeats, stale pointers) commit nothing
/// and return Ok so the caller just re-reads state.
fn settle<T>(op: &str, result: error::Result<T>) -> Result<Option<T>, String> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            log::debug!("{}: no-op: {}", op, e);
            Ok(None)
        }
        Err(e) => {
            log::warn!("{}: {}", op, e);
            Err(e.into())
        }
    }
}

fn load_battle(store: &dyn BattleStore, battle_id: u64) -> Result<Battle, String> {
    store
        .battle(battle_id)
        .ok_or_else(|| BattleError::not_found("battle", battle_id).into())
}

fn load_group(store: &dyn BattleStore, group_id: u64) -> Result<BattleGroup, String> {
    store
        .group(group_id)
        .ok_or_else(|| BattleError::not_found("group", group_id).into())
}

/// Reject a join code that could never have been issued, before touching
/// any table. The length is only bounded: codes drawn under an older
/// `code_length` stay joinable, and an unknown code is left to the lookup.
fn check_code_format(code: &str) -> Result<(), String> {
    if !codes::is_well_formed_code(&codes::normalize_code(code)) {
        log::warn!("[JOIN] invalid code format {:?}", code);
        return Err(BattleError::InvalidInput(format!(
            "code must be {} to {} letters or digits",
            codes::CODE_MIN_LEN,
            codes::CODE_MAX_LEN
        ))
        .into());
    }
    Ok(())
}

// ==================== REDUCERS ====================

/// Initialize module
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    if ctx.db.engine_config().id().find(&CONFIG_ID).is_none() {
        ctx.db.engine_config().insert(EngineConfig::default());
    }

    log::info!("Quiz battle module initialized at {}", clock::rfc3339(ctx.timestamp));
}

/// Change engine tuning from a JSON object of overrides
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn update_engine_config(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if !is_authorized_worker(ctx) {
        log::warn!("Unauthorized update_engine_config attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut config = TableStore::new(ctx).config();
    config.apply_overrides(&json_data).map_err(String::from)?;

    if ctx.db.engine_config().id().find(&CONFIG_ID).is_some() {
        ctx.db.engine_config().id().update(config);
    } else {
        ctx.db.engine_config().insert(config);
    }
    log::info!("[CONFIG] updated by {}: {}", ctx.sender, json_data);
    Ok(())
}

/// Teacher creates a battle with its groups and questions
#[reducer]
pub fn create_battle(
    ctx: &ReducerContext,
    name: String,
    mode: ProgressionMode,
    group_count: u32,
    group_size: u32,
    time_limit_secs: u32,
    overflow_policy: OverflowPolicy,
    questions_json: String,
) -> Result<(), String> {
    let questions = import::parse_questions(&questions_json).map_err(|e| {
        log::warn!("[BATTLE] create rejected: {}", e);
        String::from(e)
    })?;

    let new = NewBattle {
        name,
        teacher_id: caller_id(ctx),
        mode,
        group_count,
        group_size,
        time_limit_secs,
        overflow_policy,
    };

    let mut store = TableStore::new(ctx);
    let code_length = store.config().code_length;
    let mut rng = ctx.rng();
    let mut next_code = || codes::generate_code(&mut rng, code_length);

    // CodeTaken is a hard failure here: the teacher has nothing to re-read
    setup::create_battle(&mut store, new, questions, ctx.timestamp, &mut next_code)
        .map(|_| ())
        .map_err(|e| {
            log::warn!("[BATTLE] create failed: {}", e);
            e.into()
        })
}

/// Student joins by battle code; the group is picked by capacity
#[reducer]
pub fn join_battle(
    ctx: &ReducerContext,
    battle_code: String,
    display_name: String,
) -> Result<(), String> {
    check_code_format(&battle_code)?;
    let mut store = TableStore::new(ctx);

    let student_id = caller_id(ctx);
    let joined = assignment::join_battle(
        &mut store,
        &battle_code,
        &student_id,
        &display_name,
        ctx.timestamp,
    );
    settle("join_battle", joined)?;
    Ok(())
}

/// Student joins a specific group by its code
#[reducer]
pub fn join_group(
    ctx: &ReducerContext,
    battle_code: String,
    group_code: String,
    display_name: String,
) -> Result<(), String> {
    check_code_format(&battle_code)?;
    check_code_format(&group_code)?;
    let mut store = TableStore::new(ctx);

    let student_id = caller_id(ctx);
    let joined = assignment::join_group(
        &mut store,
        &battle_code,
        &group_code,
        &student_id,
        &display_name,
        ctx.timestamp,
    );
    settle("join_group", joined)?;
    Ok(())
}

/// Teacher or any joined student starts the battle; repeats are no-ops
#[reducer]
pub fn start_battle(ctx: &ReducerContext, battle_id: u64) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let battle = load_battle(&store, battle_id)?;
    assignment::require_participant(&store, &battle, &caller_id(ctx)).map_err(String::from)?;

    settle("start_battle", progression::start_battle(&mut store, battle_id, ctx.timestamp))?;
    Ok(())
}

/// A group answers a question. `chosen_index` is the picked answer tile.
#[reducer]
pub fn submit_answer(
    ctx: &ReducerContext,
    battle_id: u64,
    group_id: u64,
    question_id: u64,
    chosen_index: u32,
    response_ms: u32,
) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let group = load_group(&store, group_id)?;
    assignment::require_member(&store, &group, &caller_id(ctx)).map_err(String::from)?;

    let sub = Submission {
        battle_id,
        group_id,
        question_id,
        chosen_index: Some(chosen_index),
        response_ms,
    };
    settle("submit_answer", submission::submit_answer(&mut store, sub, ctx.timestamp))?;
    Ok(())
}

/// A group's clock ran out on a lockstep question
#[reducer]
pub fn submit_timeout(
    ctx: &ReducerContext,
    battle_id: u64,
    group_id: u64,
    question_id: u64,
) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let group = load_group(&store, group_id)?;
    assignment::require_member(&store, &group, &caller_id(ctx)).map_err(String::from)?;

    settle(
        "submit_timeout",
        submission::submit_timeout(&mut store, battle_id, group_id, question_id, ctx.timestamp),
    )?;
    Ok(())
}

/// Move the battle past `expected_pointer`. Lockstep moves the shared
/// question; self-paced only settles completion.
#[reducer]
pub fn advance_battle(
    ctx: &ReducerContext,
    battle_id: u64,
    expected_pointer: u32,
) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let battle = load_battle(&store, battle_id)?;
    assignment::require_participant(&store, &battle, &caller_id(ctx)).map_err(String::from)?;

    settle(
        "advance_battle",
        progression::advance_battle(&mut store, battle_id, expected_pointer, ctx.timestamp),
    )?;
    Ok(())
}

/// Lockstep all-answered detector; any client may call it
#[reducer]
pub fn auto_advance(
    ctx: &ReducerContext,
    battle_id: u64,
    expected_pointer: u32,
) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let battle = load_battle(&store, battle_id)?;
    assignment::require_participant(&store, &battle, &caller_id(ctx)).map_err(String::from)?;

    settle(
        "auto_advance",
        progression::auto_advance(&mut store, battle_id, expected_pointer, ctx.timestamp),
    )?;
    Ok(())
}

/// Self-paced: move the caller's group past `expected_pointer`
#[reducer]
pub fn advance_group(
    ctx: &ReducerContext,
    group_id: u64,
    expected_pointer: u32,
) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let group = load_group(&store, group_id)?;
    assignment::require_member(&store, &group, &caller_id(ctx)).map_err(String::from)?;

    settle(
        "advance_group",
        progression::advance_group(&mut store, group_id, expected_pointer, ctx.timestamp),
    )?;
    Ok(())
}

/// Owner resets a battle to waiting; members stay in their groups
#[reducer]
pub fn restart_battle(ctx: &ReducerContext, battle_id: u64) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    settle(
        "restart_battle",
        progression::restart_battle(&mut store, battle_id, &caller_id(ctx)),
    )?;
    Ok(())
}

/// Owner deletes a battle and everything under it
#[reducer]
pub fn delete_battle(ctx: &ReducerContext, battle_id: u64) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    settle("delete_battle", setup::delete_battle(&mut store, battle_id, &caller_id(ctx)))?;
    Ok(())
}

/// Pay out a group's reward; members already paid are skipped
#[reducer]
pub fn finalize_group(ctx: &ReducerContext, group_id: u64) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let group = load_group(&store, group_id)?;
    let battle = load_battle(&store, group.battle_id)?;
    assignment::require_participant(&store, &battle, &caller_id(ctx)).map_err(String::from)?;

    let mut ledger = TableLedger::new(ctx);
    settle(
        "finalize_group",
        finalize::finalize_group(&mut store, &mut ledger, group_id, ctx.timestamp),
    )?;
    Ok(())
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::join_battle;
    use crate::clock::at_ms;
    use crate::finalize::finalize_group;
    use crate::progression::{advance_battle, auto_advance, start_battle, BattleState};
    use crate::setup::fixtures::*;
    use crate::store::memory::{MemoryLedger, MemoryStore};
    use crate::store::PointsLedger;
    use crate::submission::submit_answer;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn submit(
        store: &mut MemoryStore,
        battle_id: u64,
        group_id: u64,
        position: usize,
        correct: bool,
        at: i64,
    ) -> error::Result<submission::AnswerOutcome> {
        let q = store.questions(battle_id)[position].clone();
        let chosen = if correct { q.correct_index } else { (q.correct_index + 1) % 3 };
        submit_answer(
            store,
            Submission {
                battle_id,
                group_id,
                question_id: q.id,
                chosen_index: Some(chosen),
                response_ms: 100,
            },
            at_ms(at),
        )
    }

    #[test]
    fn test_lockstep_battle_end_to_end() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 2, 1), 3);
        let mut ledger = MemoryLedger::default();
        let a = join_battle(&mut store, &battle.code, "s-a", "Ada", at_ms(0)).unwrap().group;
        let b = join_battle(&mut store, &battle.code, "s-b", "Bo", at_ms(0)).unwrap().group;
        assert_ne!(a.id, b.id);

        start_battle(&mut store, battle.id, at_ms(1_000)).unwrap();

        // Question 0: A right, B wrong
        submit(&mut store, battle.id, a.id, 0, true, 1_100).unwrap();
        submit(&mut store, battle.id, b.id, 0, false, 1_200).unwrap();
        let state = auto_advance(&mut store, battle.id, 0, at_ms(3_200)).unwrap();
        assert_eq!(state, BattleState::Active { question_pointer: 1 });

        // Question 1: B's second wrong answer knocks it out
        submit(&mut store, battle.id, a.id, 1, true, 3_300).unwrap();
        let out = submit(&mut store, battle.id, b.id, 1, false, 3_400).unwrap();
        assert!(out.eliminated);
        let state = auto_advance(&mut store, battle.id, 1, at_ms(5_400)).unwrap();
        assert_eq!(state, BattleState::Active { question_pointer: 2 });

        // Question 2: only A is still required; B may keep playing
        submit(&mut store, battle.id, a.id, 2, true, 5_500).unwrap();
        submit(&mut store, battle.id, b.id, 2, false, 5_600).unwrap();
        let state = auto_advance(&mut store, battle.id, 2, at_ms(7_600)).unwrap();
        assert_eq!(state, BattleState::Finished);

        let a_final = store.group(a.id).unwrap();
        let b_final = store.group(b.id).unwrap();
        assert_eq!(a_final.score, 2700);
        assert_eq!(a_final.correct_answers, 3);
        assert!(b_final.eliminated);
        assert_eq!(b_final.wrong_answers, 3);
        assert_eq!(b_final.score, 0);

        let paid_a = finalize_group(&mut store, &mut ledger, a.id, at_ms(8_000)).unwrap();
        let paid_b = finalize_group(&mut store, &mut ledger, b.id, at_ms(8_000)).unwrap();
        assert_eq!((paid_a.rank, paid_a.amount), (Some(0), 200));
        assert_eq!((paid_b.rank, paid_b.amount), (None, 25));
        assert_eq!(ledger.credited_total("s-a", TEACHER), 200);
        assert_eq!(ledger.credited_total("s-b", TEACHER), 25);

        let finished = store.battle(battle.id).unwrap();
        assert_eq!(BattleState::of(&finished), BattleState::Finished);
        assert_eq!(finished.question_pointer, 3);
        assert_eq!(store.answers(battle.id).len(), 6);
    }

    #[test]
    fn test_two_observers_advance_once() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 2, 2), 5);
        start_battle(&mut store, battle.id, at_ms(0)).unwrap();
        advance_battle(&mut store, battle.id, 0, at_ms(10)).unwrap();
        advance_battle(&mut store, battle.id, 1, at_ms(20)).unwrap();

        // Both observers saw pointer 2 and both ask to move on
        let first = advance_battle(&mut store, battle.id, 2, at_ms(30)).unwrap();
        let second = advance_battle(&mut store, battle.id, 2, at_ms(31)).unwrap();
        assert_eq!(first, BattleState::Active { question_pointer: 3 });
        assert_eq!(second, BattleState::Active { question_pointer: 3 });
        assert_eq!(store.battle(battle.id).unwrap().question_pointer, 3);
    }

    #[test]
    fn test_concurrent_double_submit_records_one_answer() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 1, 2), 2);
        let group = join_battle(&mut store, &battle.code, "s1", "Ada", at_ms(0)).unwrap().group;
        join_battle(&mut store, &battle.code, "s2", "Bo", at_ms(0)).unwrap();
        start_battle(&mut store, battle.id, at_ms(0)).unwrap();
        let question = store.questions(battle.id)[0].clone();

        // Reducers are serialized by the host; the mutex plays that role
        let store = Arc::new(Mutex::new(store));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let store = Arc::clone(&store);
                let sub = Submission {
                    battle_id: battle.id,
                    group_id: group.id,
                    question_id: question.id,
                    chosen_index: Some(question.correct_index),
                    response_ms: 200 + i,
                };
                thread::spawn(move || {
                    let mut store = store.lock().unwrap();
                    submit_answer(&mut *store, sub, at_ms(500)).map(|o| o.points_earned)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(BattleError::AlreadyAnswered { .. }))));

        let store = store.lock().unwrap();
        assert_eq!(store.answers_for_question(question.id).len(), 1);
        let group = store.group(group.id).unwrap();
        assert_eq!(group.correct_answers, 1);
        assert!(group.score == 800 || group.score == 799);
    }

    #[test]
    fn test_lockstep_pointer_stays_in_range() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 1, 2), 3);
        start_battle(&mut store, battle.id, at_ms(0)).unwrap();

        for step in 0..10u32 {
            let pointer = store.battle(battle.id).unwrap().question_pointer;
            let _ = advance_battle(&mut store, battle.id, pointer, at_ms(i64::from(step) * 10 + 1));
            let battle = store.battle(battle.id).unwrap();
            assert!(battle.question_pointer <= battle.question_count);
            if battle.status != BattleStatus::Finished {
                assert!(battle.question_pointer < battle.question_count);
            }
        }
        assert_eq!(store.battle(battle.id).unwrap().status, BattleStatus::Finished);
    }

    #[test]
    fn test_settle_maps_recoverable_errors() {
        let stale: error::Result<()> =
            Err(BattleError::AlreadyAnswered { question_id: 1, group_id: 2 });
        assert_eq!(settle("test", stale), Ok(None));

        let hard: error::Result<()> = Err(BattleError::Unauthorized("nope".into()));
        assert_eq!(settle("test", hard), Err("unauthorized: nope".to_string()));

        assert_eq!(settle("test", Ok(7)), Ok(Some(7)));
    }

    #[test]
    fn test_code_format_is_independent_of_configured_length() {
        assert!(check_code_format("ab3xyz").is_ok());
        assert!(check_code_format("AB3XYZ23").is_ok());
        assert!(check_code_format("AB3").is_err());
        assert!(check_code_format("AB0XYZ").is_err());
        assert!(check_code_format("ABCDEFGHJKLMN").is_err());
    }

    #[test]
    fn test_existing_codes_join_after_code_length_change() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 2, 2), 2);
        assert_eq!(battle.code.len(), 6);
        store.config.apply_overrides(r#"{"codeLength": 8}"#).unwrap();

        assert!(check_code_format(&battle.code).is_ok());
        let joined = join_battle(&mut store, &battle.code, "s1", "Ada", at_ms(0)).unwrap();
        assert_eq!(joined.group.battle_id, battle.id);

        // A well-formed code nobody issued is a lookup miss, not a format error
        assert!(check_code_format("ZZZZZZZZ").is_ok());
        assert!(matches!(
            join_battle(&mut store, "ZZZZZZZZ", "s2", "Bo", at_ms(0)),
            Err(BattleError::NotFound { .. })
        ));
    }

    #[test]
    fn test_progress_tally_for_running_battle() {
        let (mut store, battle) = seeded(new_battle(ProgressionMode::Lockstep, 2, 2), 2);
        start_battle(&mut store, battle.id, at_ms(0)).unwrap();
        let groups = store.groups(battle.id);
        submit(&mut store, battle.id, groups[0].id, 0, true, 1_000).unwrap();

        let battle = store.battle(battle.id).unwrap();
        let q = store.questions(battle.id)[0].clone();
        let progress = progression::tally_readiness(
            &battle,
            &store.groups(battle.id),
            &store.answers_for_question(q.id),
        );
        assert_eq!(progress.battle_id, battle.id);
        assert_eq!((progress.answered, progress.required), (1, 2));
        assert_eq!(progress.last_answer_at, Some(at_ms(1_000)));
    }
}
