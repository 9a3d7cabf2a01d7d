//! Storage seam between the battle engine and SpacetimeDB tables.
//!
//! Every uniqueness invariant lives in a `#[unique]` column; inserts report a
//! collision as `UniqueViolation` and the engine translates it into its own
//! error taxonomy. Each reducer is one transaction, so a reducer that returns
//! an error leaves no partial writes behind.

use spacetimedb::{ReducerContext, Table};

use crate::config::CONFIG_ID;
use crate::{
    answer, battle, battle_group, engine_config, group_member, payout_receipt, points_tally,
    question,
};
use crate::{
    Answer, Battle, BattleGroup, EngineConfig, GroupMember, PayoutReceipt, PointsTally, Question,
};

#[cfg(test)]
pub(crate) mod memory;

/// An insert rejected by a unique column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueViolation {
    pub constraint: &'static str,
    pub key: String,
}

impl UniqueViolation {
    pub fn new(constraint: &'static str, key: impl Into<String>) -> Self {
        UniqueViolation {
            constraint,
            key: key.into(),
        }
    }
}

pub fn group_key(battle_id: u64, code: &str) -> String {
    format!("{}:{}", battle_id, code)
}

pub fn member_key(battle_id: u64, student_id: &str) -> String {
    format!("{}:{}", battle_id, student_id)
}

pub fn question_key(battle_id: u64, position: u32) -> String {
    format!("{}:{}", battle_id, position)
}

pub fn answer_key(question_id: u64, group_id: u64) -> String {
    format!("{}:{}", question_id, group_id)
}

pub fn receipt_key(battle_id: u64, group_id: u64, student_id: &str) -> String {
    format!("{}:{}:{}", battle_id, group_id, student_id)
}

pub fn tally_key(student_id: &str, teacher_id: &str) -> String {
    format!("{}:{}", student_id, teacher_id)
}

/// Everything the engine reads and writes.
///
/// Listings come back in a stable order: groups and members by creation
/// (id), questions by position.
pub trait BattleStore {
    fn config(&self) -> EngineConfig;

    fn battle(&self, id: u64) -> Option<Battle>;
    fn battle_by_code(&self, code: &str) -> Option<Battle>;
    fn insert_battle(&mut self, battle: Battle) -> Result<Battle, UniqueViolation>;
    fn update_battle(&mut self, battle: Battle) -> Battle;
    fn delete_battle(&mut self, id: u64);

    fn group(&self, id: u64) -> Option<BattleGroup>;
    fn groups(&self, battle_id: u64) -> Vec<BattleGroup>;
    fn insert_group(&mut self, group: BattleGroup) -> Result<BattleGroup, UniqueViolation>;
    fn update_group(&mut self, group: BattleGroup) -> BattleGroup;
    fn delete_group(&mut self, id: u64);

    fn members(&self, group_id: u64) -> Vec<GroupMember>;
    fn battle_members(&self, battle_id: u64) -> Vec<GroupMember>;
    fn membership(&self, battle_id: u64, student_id: &str) -> Option<GroupMember>;
    fn insert_member(&mut self, member: GroupMember) -> Result<GroupMember, UniqueViolation>;
    fn delete_member(&mut self, id: u64);

    fn question(&self, id: u64) -> Option<Question>;
    fn questions(&self, battle_id: u64) -> Vec<Question>;
    fn insert_question(&mut self, question: Question) -> Result<Question, UniqueViolation>;
    fn delete_question(&mut self, id: u64);

    fn answers(&self, battle_id: u64) -> Vec<Answer>;
    fn answers_for_question(&self, question_id: u64) -> Vec<Answer>;
    fn answer_for(&self, question_id: u64, group_id: u64) -> Option<Answer>;
    fn insert_answer(&mut self, answer: Answer) -> Result<Answer, UniqueViolation>;
    fn delete_answer(&mut self, id: u64);

    fn insert_receipt(&mut self, receipt: PayoutReceipt) -> Result<PayoutReceipt, UniqueViolation>;
}

/// Profile collaborator: per (student, teacher) point tally
pub trait PointsLedger {
    /// Add `amount` and return the new total
    fn credit_points(&mut self, student_id: &str, teacher_id: &str, amount: u32) -> u32;
    fn credited_total(&self, student_id: &str, teacher_id: &str) -> u32;
}

/// `BattleStore` over the module's tables
pub struct TableStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        TableStore { ctx }
    }
}

impl BattleStore for TableStore<'_> {
    fn config(&self) -> EngineConfig {
        self.ctx.db.engine_config().id().find(&CONFIG_ID).unwrap_or_default()
    }

    fn battle(&self, id: u64) -> Option<Battle> {
        self.ctx.db.battle().id().find(&id)
    }

    fn battle_by_code(&self, code: &str) -> Option<Battle> {
        self.ctx.db.battle().code().find(&code.to_string())
    }

    fn insert_battle(&mut self, battle: Battle) -> Result<Battle, UniqueViolation> {
        let code = battle.code.clone();
        self.ctx
            .db
            .battle()
            .try_insert(battle)
            .map_err(|_| UniqueViolation::new("battle.code", code))
    }

    fn update_battle(&mut self, battle: Battle) -> Battle {
        self.ctx.db.battle().id().update(battle)
    }

    fn delete_battle(&mut self, id: u64) {
        self.ctx.db.battle().id().delete(&id);
    }

    fn group(&self, id: u64) -> Option<BattleGroup> {
        self.ctx.db.battle_group().id().find(&id)
    }

    fn groups(&self, battle_id: u64) -> Vec<BattleGroup> {
        let mut groups: Vec<_> =
            self.ctx.db.battle_group().battle_id().filter(&battle_id).collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    fn insert_group(&mut self, group: BattleGroup) -> Result<BattleGroup, UniqueViolation> {
        let key = group.group_key.clone();
        self.ctx
            .db
            .battle_group()
            .try_insert(group)
            .map_err(|_| UniqueViolation::new("battle_group.group_key", key))
    }

    fn update_group(&mut self, group: BattleGroup) -> BattleGroup {
        self.ctx.db.battle_group().id().update(group)
    }

    fn delete_group(&mut self, id: u64) {
        self.ctx.db.battle_group().id().delete(&id);
    }

    fn members(&self, group_id: u64) -> Vec<GroupMember> {
        let mut members: Vec<_> = self.ctx.db.group_member().group_id().filter(&group_id).collect();
        members.sort_by_key(|m| m.id);
        members
    }

    fn battle_members(&self, battle_id: u64) -> Vec<GroupMember> {
        let mut members: Vec<_> =
            self.ctx.db.group_member().battle_id().filter(&battle_id).collect();
        members.sort_by_key(|m| m.id);
        members
    }

    fn membership(&self, battle_id: u64, student_id: &str) -> Option<GroupMember> {
        self.ctx
            .db
            .group_member()
            .member_key()
            .find(&member_key(battle_id, student_id))
    }

    fn insert_member(&mut self, member: GroupMember) -> Result<GroupMember, UniqueViolation> {
        let key = member.member_key.clone();
        self.ctx
            .db
            .group_member()
            .try_insert(member)
            .map_err(|_| UniqueViolation::new("group_member.member_key", key))
    }

    fn delete_member(&mut self, id: u64) {
        self.ctx.db.group_member().id().delete(&id);
    }

    fn question(&self, id: u64) -> Option<Question> {
        self.ctx.db.question().id().find(&id)
    }

    fn questions(&self, battle_id: u64) -> Vec<Question> {
        let mut questions: Vec<_> = self.ctx.db.question().battle_id().filter(&battle_id).collect();
        questions.sort_by_key(|q| q.position);
        questions
    }

    fn insert_question(&mut self, question: Question) -> Result<Question, UniqueViolation> {
        let key = question.question_key.clone();
        self.ctx
            .db
            .question()
            .try_insert(question)
            .map_err(|_| UniqueViolation::new("question.question_key", key))
    }

    fn delete_question(&mut self, id: u64) {
        self.ctx.db.question().id().delete(&id);
    }

    fn answers(&self, battle_id: u64) -> Vec<Answer> {
        self.ctx.db.answer().battle_id().filter(&battle_id).collect()
    }

    fn answers_for_question(&self, question_id: u64) -> Vec<Answer> {
        self.ctx.db.answer().question_id().filter(&question_id).collect()
    }

    fn answer_for(&self, question_id: u64, group_id: u64) -> Option<Answer> {
        self.ctx
            .db
            .answer()
            .answer_key()
            .find(&answer_key(question_id, group_id))
    }

    fn insert_answer(&mut self, answer: Answer) -> Result<Answer, UniqueViolation> {
        let key = answer.answer_key.clone();
        self.ctx
            .db
            .answer()
            .try_insert(answer)
            .map_err(|_| UniqueViolation::new("answer.answer_key", key))
    }

    fn delete_answer(&mut self, id: u64) {
        self.ctx.db.answer().id().delete(&id);
    }

    fn insert_receipt(&mut self, receipt: PayoutReceipt) -> Result<PayoutReceipt, UniqueViolation> {
        let key = receipt.receipt_key.clone();
        self.ctx
            .db
            .payout_receipt()
            .try_insert(receipt)
            .map_err(|_| UniqueViolation::new("payout_receipt.receipt_key", key))
    }
}

/// `PointsLedger` over the `points_tally` table
pub struct TableLedger<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableLedger<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        TableLedger { ctx }
    }
}

impl PointsLedger for TableLedger<'_> {
    fn credit_points(&mut self, student_id: &str, teacher_id: &str, amount: u32) -> u32 {
        let key = tally_key(student_id, teacher_id);
        match self.ctx.db.points_tally().tally_key().find(&key) {
            Some(mut tally) => {
                tally.total = tally.total.saturating_add(amount);
                tally.updated_at = self.ctx.timestamp;
                self.ctx.db.points_tally().tally_key().update(tally).total
            }
            None => {
                self.ctx
                    .db
                    .points_tally()
                    .insert(PointsTally {
                        tally_key: key,
                        student_id: student_id.to_string(),
                        teacher_id: teacher_id.to_string(),
                        total: amount,
                        updated_at: self.ctx.timestamp,
                    })
                    .total
            }
        }
    }

    fn credited_total(&self, student_id: &str, teacher_id: &str) -> u32 {
        self.ctx
            .db
            .points_tally()
            .tally_key()
            .find(&tally_key(student_id, teacher_id))
            .map(|t| t.total)
            .unwrap_or(0)
    }
}
