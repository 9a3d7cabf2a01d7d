//! In-process store for tests. Mirrors the table semantics the engine relies
//! on: auto-increment ids and rejection of duplicate unique keys.

use std::collections::HashMap;

use super::{member_key, tally_key, BattleStore, PointsLedger, UniqueViolation};
use crate::{Answer, Battle, BattleGroup, EngineConfig, GroupMember, PayoutReceipt, Question};

#[derive(Default)]
pub struct MemoryStore {
    pub config: EngineConfig,
    next_id: u64,
    battles: Vec<Battle>,
    groups: Vec<BattleGroup>,
    members: Vec<GroupMember>,
    questions: Vec<Question>,
    answers: Vec<Answer>,
    receipts: Vec<PayoutReceipt>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_id(&mut self, id: u64) -> u64 {
        if id != 0 {
            return id;
        }
        self.next_id += 1;
        self.next_id
    }
}

impl BattleStore for MemoryStore {
    fn config(&self) -> EngineConfig {
        self.config.clone()
    }

    fn battle(&self, id: u64) -> Option<Battle> {
        self.battles.iter().find(|b| b.id == id).cloned()
    }

    fn battle_by_code(&self, code: &str) -> Option<Battle> {
        self.battles.iter().find(|b| b.code == code).cloned()
    }

    fn insert_battle(&mut self, mut battle: Battle) -> Result<Battle, UniqueViolation> {
        if self.battles.iter().any(|b| b.code == battle.code) {
            return Err(UniqueViolation::new("battle.code", battle.code));
        }
        battle.id = self.assign_id(battle.id);
        self.battles.push(battle.clone());
        Ok(battle)
    }

    fn update_battle(&mut self, battle: Battle) -> Battle {
        if let Some(row) = self.battles.iter_mut().find(|b| b.id == battle.id) {
            *row = battle.clone();
        }
        battle
    }

    fn delete_battle(&mut self, id: u64) {
        self.battles.retain(|b| b.id != id);
    }

    fn group(&self, id: u64) -> Option<BattleGroup> {
        self.groups.iter().find(|g| g.id == id).cloned()
    }

    fn groups(&self, battle_id: u64) -> Vec<BattleGroup> {
        let mut groups: Vec<_> =
            self.groups.iter().filter(|g| g.battle_id == battle_id).cloned().collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    fn insert_group(&mut self, mut group: BattleGroup) -> Result<BattleGroup, UniqueViolation> {
        if self.groups.iter().any(|g| g.group_key == group.group_key) {
            return Err(UniqueViolation::new("battle_group.group_key", group.group_key));
        }
        group.id = self.assign_id(group.id);
        self.groups.push(group.clone());
        Ok(group)
    }

    fn update_group(&mut self, group: BattleGroup) -> BattleGroup {
        if let Some(row) = self.groups.iter_mut().find(|g| g.id == group.id) {
            *row = group.clone();
        }
        group
    }

    fn delete_group(&mut self, id: u64) {
        self.groups.retain(|g| g.id != id);
    }

    fn members(&self, group_id: u64) -> Vec<GroupMember> {
        self.members.iter().filter(|m| m.group_id == group_id).cloned().collect()
    }

    fn battle_members(&self, battle_id: u64) -> Vec<GroupMember> {
        self.members.iter().filter(|m| m.battle_id == battle_id).cloned().collect()
    }

    fn membership(&self, battle_id: u64, student_id: &str) -> Option<GroupMember> {
        let key = member_key(battle_id, student_id);
        self.members.iter().find(|m| m.member_key == key).cloned()
    }

    fn insert_member(&mut self, mut member: GroupMember) -> Result<GroupMember, UniqueViolation> {
        if self.members.iter().any(|m| m.member_key == member.member_key) {
            return Err(UniqueViolation::new("group_member.member_key", member.member_key));
        }
        member.id = self.assign_id(member.id);
        self.members.push(member.clone());
        Ok(member)
    }

    fn delete_member(&mut self, id: u64) {
        self.members.retain(|m| m.id != id);
    }

    fn question(&self, id: u64) -> Option<Question> {
        self.questions.iter().find(|q| q.id == id).cloned()
    }

    fn questions(&self, battle_id: u64) -> Vec<Question> {
        let mut questions: Vec<_> = self
            .questions
            .iter()
            .filter(|q| q.battle_id == battle_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        questions
    }

    fn insert_question(&mut self, mut question: Question) -> Result<Question, UniqueViolation> {
        if self.questions.iter().any(|q| q.question_key == question.question_key) {
            return Err(UniqueViolation::new("question.question_key", question.question_key));
        }
        question.id = self.assign_id(question.id);
        self.questions.push(question.clone());
        Ok(question)
    }

    fn delete_question(&mut self, id: u64) {
        self.questions.retain(|q| q.id != id);
    }

    fn answers(&self, battle_id: u64) -> Vec<Answer> {
        self.answers.iter().filter(|a| a.battle_id == battle_id).cloned().collect()
    }

    fn answers_for_question(&self, question_id: u64) -> Vec<Answer> {
        self.answers.iter().filter(|a| a.question_id == question_id).cloned().collect()
    }

    fn answer_for(&self, question_id: u64, group_id: u64) -> Option<Answer> {
        self.answers
            .iter()
            .find(|a| a.question_id == question_id && a.group_id == group_id)
            .cloned()
    }

    fn insert_answer(&mut self, mut answer: Answer) -> Result<Answer, UniqueViolation> {
        if self.answers.iter().any(|a| a.answer_key == answer.answer_key) {
            return Err(UniqueViolation::new("answer.answer_key", answer.answer_key));
        }
        answer.id = self.assign_id(answer.id);
        self.answers.push(answer.clone());
        Ok(answer)
    }

    fn delete_answer(&mut self, id: u64) {
        self.answers.retain(|a| a.id != id);
    }

    fn insert_receipt(
        &mut self,
        mut receipt: PayoutReceipt,
    ) -> Result<PayoutReceipt, UniqueViolation> {
        if self.receipts.iter().any(|r| r.receipt_key == receipt.receipt_key) {
            return Err(UniqueViolation::new("payout_receipt.receipt_key", receipt.receipt_key));
        }
        receipt.id = self.assign_id(receipt.id);
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    totals: HashMap<String, u32>,
}

impl PointsLedger for MemoryLedger {
    fn credit_points(&mut self, student_id: &str, teacher_id: &str, amount: u32) -> u32 {
        let total = self.totals.entry(tally_key(student_id, teacher_id)).or_insert(0);
        *total = total.saturating_add(amount);
        *total
    }

    fn credited_total(&self, student_id: &str, teacher_id: &str) -> u32 {
        self.totals
            .get(&tally_key(student_id, teacher_id))
            .copied()
            .unwrap_or(0)
    }
}
