//! Course registry and transaction state machine
//!
//! `Marketplace` owns all ledger state: the course registry, the contract
//! owner, the circuit breaker and the held balance. Calls are processed in
//! two phases:
//!
//! 1. [`Marketplace::execute`] validates a transaction against the current
//!    state and returns the [`Effects`] it would have. It never mutates.
//! 2. [`Marketplace::apply`] installs those effects. It cannot fail.
//!
//! The actor persists `Effects` between the two phases, so a rejected call
//! or a failed write leaves no trace.
//!
//! # Invariants
//!
//! - `earmarked == Σ course.price` over the registry
//! - `balance >= earmarked` unless an emergency withdrawal drained the ledger
//! - indices are dense and assigned in commit order

use crate::crypto::course_hash;
use crate::types::{
    Address, Amount, BreakerState, Call, Course, CourseHash, CourseId, CourseLookup, CourseState,
    Payout, Proof, Transaction,
};
use crate::{Error, Result};
use std::collections::HashMap;

/// Insertion-ordered course registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    courses: HashMap<CourseHash, Course>,
    order: Vec<CourseHash>,
}

impl Registry {
    /// Look up a course by identity hash
    pub fn lookup(&self, hash: &CourseHash) -> CourseLookup {
        self.courses.get(hash).copied().into()
    }

    /// Hash of the course created at `index`
    pub fn hash_at(&self, index: u64) -> Result<CourseHash> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.order.get(i))
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                count: self.len(),
            })
    }

    /// Number of courses
    pub fn len(&self) -> u64 {
        self.order.len() as u64
    }

    /// True when no course was ever purchased
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Courses in index order
    pub fn iter(&self) -> impl Iterator<Item = (&CourseHash, &Course)> + '_ {
        self.order
            .iter()
            .filter_map(move |hash| self.courses.get(hash).map(|course| (hash, course)))
    }

    /// Sum of prices still owed back to buyers, `None` if it overflows
    pub fn earmarked(&self) -> Option<Amount> {
        self.courses
            .values()
            .try_fold(0 as Amount, |total, c| total.checked_add(c.price))
    }

    /// Insert or replace a record, returning the previous price
    fn upsert(&mut self, hash: CourseHash, course: Course) -> Amount {
        match self.courses.insert(hash, course) {
            Some(previous) => previous.price,
            None => {
                self.order.push(hash);
                0
            }
        }
    }
}

/// Course record written by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseWrite {
    /// Identity hash
    pub hash: CourseHash,
    /// New record
    pub course: Course,
    /// True when the record is new and takes the next index
    pub created: bool,
}

/// State changes produced by a validated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effects {
    /// Course written
    pub course: Option<CourseWrite>,
    /// New contract owner
    pub owner: Option<Address>,
    /// New breaker state
    pub breaker: Option<BreakerState>,
    /// Held balance after the call
    pub balance: Amount,
    /// Value paid out by the ledger
    pub payouts: Vec<Payout>,
    /// Registry and ownership are erased (self-destruct)
    pub wipe: bool,
    /// Next signed-call nonce for a sender
    pub nonce: Option<(Address, u64)>,
}

impl Effects {
    fn with_balance(balance: Amount) -> Self {
        Self {
            course: None,
            owner: None,
            breaker: None,
            balance,
            payouts: Vec::new(),
            wipe: false,
            nonce: None,
        }
    }

    fn write(mut self, hash: CourseHash, course: Course, created: bool) -> Self {
        self.course = Some(CourseWrite {
            hash,
            course,
            created,
        });
        self
    }

    fn pay(mut self, to: Address, amount: Amount) -> Self {
        if amount > 0 {
            self.payouts.push(Payout { to, amount });
        }
        self
    }

    /// Course touched by the call
    pub fn course_hash(&self) -> Option<CourseHash> {
        self.course.map(|w| w.hash)
    }
}

/// Persisted ledger state, loaded at startup
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Courses in index order
    pub courses: Vec<(CourseHash, Course)>,
    /// Contract owner
    pub owner: Address,
    /// Breaker state
    pub breaker: BreakerState,
    /// Held balance
    pub balance: Amount,
    /// Next signed-call nonce per sender
    pub nonces: HashMap<Address, u64>,
}

/// Ledger state machine
#[derive(Debug, Clone)]
pub struct Marketplace {
    registry: Registry,
    owner: Address,
    breaker: BreakerState,
    balance: Amount,
    earmarked: Amount,
    nonces: HashMap<Address, u64>,
}

impl Marketplace {
    /// Fresh ledger administered by `owner`
    pub fn genesis(owner: Address) -> Self {
        Self {
            registry: Registry::default(),
            owner,
            breaker: BreakerState::Running,
            balance: 0,
            earmarked: 0,
            nonces: HashMap::new(),
        }
    }

    /// Rebuild from persisted state
    pub fn restore(snapshot: Snapshot) -> Result<Self> {
        let mut registry = Registry::default();
        for (position, (hash, course)) in snapshot.courses.into_iter().enumerate() {
            if course.index != position as u64 {
                return Err(Error::Storage(format!(
                    "course {} has index {}, expected {}",
                    hash, course.index, position
                )));
            }
            registry.upsert(hash, course);
        }

        let earmarked = registry
            .earmarked()
            .ok_or_else(|| Error::Storage("earmarked total overflows".to_string()))?;
        Ok(Self {
            registry,
            owner: snapshot.owner,
            breaker: snapshot.breaker,
            balance: snapshot.balance,
            earmarked,
            nonces: snapshot.nonces,
        })
    }

    // Reads

    /// Registry view
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Course by identity hash
    pub fn course(&self, hash: &CourseHash) -> CourseLookup {
        self.registry.lookup(hash)
    }

    /// Hash of the course at `index`
    pub fn course_hash_at(&self, index: u64) -> Result<CourseHash> {
        self.registry.hash_at(index)
    }

    /// Number of courses
    pub fn course_count(&self) -> u64 {
        self.registry.len()
    }

    /// Contract owner (zero once destroyed)
    pub fn contract_owner(&self) -> Address {
        self.owner
    }

    /// Circuit breaker state
    pub fn breaker(&self) -> BreakerState {
        self.breaker
    }

    /// Held balance
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Balance reserved for refunds
    pub fn earmarked(&self) -> Amount {
        self.earmarked
    }

    /// Balance the owner may withdraw while running
    pub fn withdrawable(&self) -> Amount {
        self.balance.saturating_sub(self.earmarked)
    }

    /// Next signed-call nonce for `address`
    pub fn next_nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    // Transition

    /// Validate `tx` and compute its effects without mutating state
    pub fn execute(&self, tx: &Transaction) -> Result<Effects> {
        if self.breaker == BreakerState::Destroyed {
            return Err(Error::Destroyed);
        }

        match &tx.call {
            Call::PurchaseCourse { course_id, proof } => self.purchase(tx, course_id, proof),
            Call::RepurchaseCourse { hash } => self.repurchase(tx, hash),
            Call::ActivateCourse { hash } => self.activate(tx, hash),
            Call::DeactivateCourse { hash } => self.deactivate(tx, hash),
            Call::TransferOwnership { new_owner } => self.transfer_ownership(tx, new_owner),
            Call::Withdraw { amount } => self.withdraw(tx, *amount),
            Call::StopContract => {
                self.ensure_contract_owner(&tx.from)?;
                self.ensure_running()?;
                ensure_unpaid(tx)?;
                let mut effects = Effects::with_balance(self.balance);
                effects.breaker = Some(BreakerState::Stopped);
                Ok(effects)
            }
            Call::ResumeContract => {
                self.ensure_contract_owner(&tx.from)?;
                self.ensure_stopped()?;
                ensure_unpaid(tx)?;
                let mut effects = Effects::with_balance(self.balance);
                effects.breaker = Some(BreakerState::Running);
                Ok(effects)
            }
            Call::EmergencyWithdraw => {
                self.ensure_contract_owner(&tx.from)?;
                self.ensure_stopped()?;
                ensure_unpaid(tx)?;
                Ok(Effects::with_balance(0).pay(self.owner, self.balance))
            }
            Call::SelfDestruct => {
                self.ensure_contract_owner(&tx.from)?;
                self.ensure_stopped()?;
                ensure_unpaid(tx)?;
                let mut effects = Effects::with_balance(0).pay(self.owner, self.balance);
                effects.breaker = Some(BreakerState::Destroyed);
                effects.wipe = true;
                Ok(effects)
            }
            Call::Deposit => Ok(Effects::with_balance(self.credit(tx.value)?)),
        }
    }

    /// Install effects produced by [`Marketplace::execute`]
    pub fn apply(&mut self, effects: &Effects) {
        if let Some(write) = effects.course {
            let previous = self.registry.upsert(write.hash, write.course);
            self.earmarked = self.earmarked - previous + write.course.price;
        }
        if let Some(owner) = effects.owner {
            self.owner = owner;
        }
        if let Some(breaker) = effects.breaker {
            self.breaker = breaker;
        }
        if let Some((address, next)) = effects.nonce {
            self.nonces.insert(address, next);
        }
        self.balance = effects.balance;

        if effects.wipe {
            self.registry = Registry::default();
            self.owner = Address::ZERO;
            self.earmarked = 0;
        }
    }

    fn purchase(&self, tx: &Transaction, course_id: &CourseId, proof: &Proof) -> Result<Effects> {
        self.ensure_running()?;

        let hash = course_hash(course_id, &tx.from);
        if let CourseLookup::Found(existing) = self.registry.lookup(&hash) {
            return Err(Error::AlreadyOwned(format!(
                "course {} already purchased by {} ({})",
                hash, existing.owner, existing.state
            )));
        }
        ensure_payment(tx.value)?;
        self.reserve(tx.value)?;

        let course = Course {
            index: self.registry.len(),
            price: tx.value,
            proof: *proof,
            owner: tx.from,
            state: CourseState::Purchased,
        };

        Ok(Effects::with_balance(self.credit(tx.value)?).write(hash, course, true))
    }

    fn repurchase(&self, tx: &Transaction, hash: &CourseHash) -> Result<Effects> {
        self.ensure_running()?;

        let mut course = self.existing(hash)?;
        if course.owner != tx.from {
            return Err(Error::Unauthorized(format!(
                "{} is not the owner of course {}",
                tx.from, hash
            )));
        }
        if course.state != CourseState::Deactivated {
            return Err(Error::InvalidState(format!(
                "course {} is {}, only deactivated courses can be repurchased",
                hash, course.state
            )));
        }
        ensure_payment(tx.value)?;
        self.reserve(tx.value)?;

        course.state = CourseState::Purchased;
        course.price = tx.value;

        Ok(Effects::with_balance(self.credit(tx.value)?).write(*hash, course, false))
    }

    fn activate(&self, tx: &Transaction, hash: &CourseHash) -> Result<Effects> {
        self.ensure_contract_owner(&tx.from)?;

        let mut course = self.existing(hash)?;
        if course.state != CourseState::Purchased {
            return Err(Error::InvalidState(format!(
                "course {} is {}, only purchased courses can be activated",
                hash, course.state
            )));
        }
        ensure_unpaid(tx)?;
        course.state = CourseState::Activated;

        Ok(Effects::with_balance(self.balance).write(*hash, course, false))
    }

    fn deactivate(&self, tx: &Transaction, hash: &CourseHash) -> Result<Effects> {
        self.ensure_contract_owner(&tx.from)?;

        let mut course = self.existing(hash)?;
        if course.state == CourseState::Deactivated {
            return Err(Error::InvalidState(format!(
                "course {} is already deactivated",
                hash
            )));
        }
        ensure_unpaid(tx)?;

        let refund = course.price;
        if refund > self.balance {
            return Err(Error::InsufficientFunds {
                requested: refund,
                available: self.balance,
            });
        }
        course.state = CourseState::Deactivated;
        course.price = 0;

        Ok(Effects::with_balance(self.balance - refund)
            .write(*hash, course, false)
            .pay(course.owner, refund))
    }

    fn transfer_ownership(&self, tx: &Transaction, new_owner: &Address) -> Result<Effects> {
        self.ensure_contract_owner(&tx.from)?;

        if new_owner.is_zero() {
            return Err(Error::InvalidAddress(
                "ownership cannot be transferred to the zero address".to_string(),
            ));
        }
        ensure_unpaid(tx)?;

        let mut effects = Effects::with_balance(self.balance);
        effects.owner = Some(*new_owner);
        Ok(effects)
    }

    fn withdraw(&self, tx: &Transaction, amount: Amount) -> Result<Effects> {
        self.ensure_contract_owner(&tx.from)?;

        if amount == 0 {
            return Err(Error::InvalidPayment(
                "withdraw amount must be positive".to_string(),
            ));
        }
        ensure_unpaid(tx)?;
        let available = self.withdrawable();
        if amount > available {
            return Err(Error::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        Ok(Effects::with_balance(self.balance - amount).pay(self.owner, amount))
    }

    fn existing(&self, hash: &CourseHash) -> Result<Course> {
        self.registry
            .lookup(hash)
            .found()
            .ok_or_else(|| Error::NotFound(hash.to_string()))
    }

    fn credit(&self, value: Amount) -> Result<Amount> {
        self.balance
            .checked_add(value)
            .ok_or_else(|| Error::InvalidPayment("balance overflow".to_string()))
    }

    // Refund liability after adding `price`
    fn reserve(&self, price: Amount) -> Result<Amount> {
        self.earmarked
            .checked_add(price)
            .ok_or_else(|| Error::InvalidPayment("earmark overflow".to_string()))
    }

    fn ensure_contract_owner(&self, caller: &Address) -> Result<()> {
        if *caller != self.owner {
            return Err(Error::Unauthorized(format!(
                "{} is not the contract owner",
                caller
            )));
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.breaker {
            BreakerState::Running => Ok(()),
            BreakerState::Stopped => Err(Error::AlreadyStopped),
            BreakerState::Destroyed => Err(Error::Destroyed),
        }
    }

    fn ensure_stopped(&self) -> Result<()> {
        match self.breaker {
            BreakerState::Stopped => Ok(()),
            BreakerState::Running => Err(Error::NotStopped),
            BreakerState::Destroyed => Err(Error::Destroyed),
        }
    }
}

fn ensure_payment(value: Amount) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidPayment(
            "course payment must be positive".to_string(),
        ));
    }
    Ok(())
}

fn ensure_unpaid(tx: &Transaction) -> Result<()> {
    if tx.value > 0 && !tx.call.is_payable() {
        return Err(Error::InvalidPayment(format!(
            "{} does not accept payment",
            tx.call.name()
        )));
    }
    Ok(())
}
