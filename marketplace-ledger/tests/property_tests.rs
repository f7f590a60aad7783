//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Balance reconciliation: balance == earmarked + withdrawable
//! - Value conservation: Σ(payments in) - Σ(payouts) == balance
//! - All-or-nothing: a rejected call changes nothing
//! - Index stability: an index keeps its hash forever, across restarts
//! - Hash determinism: identity hash is packed Keccak-256

use marketplace_ledger::{
    crypto::{course_hash, keccak256},
    marketplace::Marketplace,
    types::{Address, Amount, Call, CourseHash, CourseId, Proof, Transaction},
    Config, Ledger,
};
use proptest::prelude::*;

const OWNER: Address = Address::from_bytes([0xa0; 20]);

fn account(n: u8) -> Address {
    Address::from_bytes([0xb0 + n; 20])
}

fn course(n: u8) -> CourseId {
    let mut bytes = [0u8; 16];
    bytes[15] = b'0' + n;
    CourseId::from_bytes(bytes)
}

/// Random call against a small universe of buyers and courses, so that
/// collisions (double purchase, repurchase, refund) are frequent
#[derive(Debug, Clone)]
enum Op {
    Purchase { buyer: u8, course: u8, value: Amount },
    Repurchase { buyer: u8, course: u8, value: Amount },
    Activate { buyer: u8, course: u8, as_owner: bool },
    Deactivate { buyer: u8, course: u8, as_owner: bool },
    Withdraw { amount: Amount, as_owner: bool },
    Deposit { value: Amount },
    Stop,
    Resume,
    EmergencyWithdraw,
    Transfer { to: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let buyer = 0u8..3;
    let course = 0u8..4;
    prop_oneof![
        4 => (buyer.clone(), course.clone(), 0u128..10_000)
            .prop_map(|(buyer, course, value)| Op::Purchase { buyer, course, value }),
        2 => (buyer.clone(), course.clone(), 0u128..10_000)
            .prop_map(|(buyer, course, value)| Op::Repurchase { buyer, course, value }),
        2 => (buyer.clone(), course.clone(), any::<bool>())
            .prop_map(|(buyer, course, as_owner)| Op::Activate { buyer, course, as_owner }),
        3 => (buyer.clone(), course, any::<bool>())
            .prop_map(|(buyer, course, as_owner)| Op::Deactivate { buyer, course, as_owner }),
        2 => (0u128..20_000, any::<bool>())
            .prop_map(|(amount, as_owner)| Op::Withdraw { amount, as_owner }),
        2 => (0u128..5_000).prop_map(|value| Op::Deposit { value }),
        1 => Just(Op::Stop),
        1 => Just(Op::Resume),
        1 => Just(Op::EmergencyWithdraw),
        1 => buyer.prop_map(|to| Op::Transfer { to }),
    ]
}

fn to_transaction(op: &Op, market: &Marketplace) -> Transaction {
    let admin = market.contract_owner();
    let pick = |as_owner: bool, buyer: u8| if as_owner { admin } else { account(buyer) };
    let hash_of = |buyer: u8, course_n: u8| course_hash(&course(course_n), &account(buyer));

    match *op {
        Op::Purchase { buyer, course: c, value } => Transaction::new(
            account(buyer),
            Call::PurchaseCourse {
                course_id: course(c),
                proof: Proof::from_bytes([c; 32]),
            },
        )
        .with_value(value),
        Op::Repurchase { buyer, course: c, value } => Transaction::new(
            account(buyer),
            Call::RepurchaseCourse {
                hash: hash_of(buyer, c),
            },
        )
        .with_value(value),
        Op::Activate { buyer, course: c, as_owner } => Transaction::new(
            pick(as_owner, buyer),
            Call::ActivateCourse {
                hash: hash_of(buyer, c),
            },
        ),
        Op::Deactivate { buyer, course: c, as_owner } => Transaction::new(
            pick(as_owner, buyer),
            Call::DeactivateCourse {
                hash: hash_of(buyer, c),
            },
        ),
        Op::Withdraw { amount, as_owner } => {
            Transaction::new(pick(as_owner, 0), Call::Withdraw { amount })
        }
        Op::Deposit { value } => Transaction::new(account(1), Call::Deposit).with_value(value),
        Op::Stop => Transaction::new(admin, Call::StopContract),
        Op::Resume => Transaction::new(admin, Call::ResumeContract),
        Op::EmergencyWithdraw => Transaction::new(admin, Call::EmergencyWithdraw),
        Op::Transfer { to } => Transaction::new(
            admin,
            Call::TransferOwnership {
                new_owner: account(to),
            },
        ),
    }
}

/// Create test ledger with temp directory
async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let ledger = open_at(&temp_dir).await;
    (ledger, temp_dir)
}

async fn open_at(temp_dir: &tempfile::TempDir) -> Ledger {
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.contract_owner = OWNER;
    Ledger::open(config).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: funds reconcile after every call and rejected calls are inert
    #[test]
    fn prop_balance_reconciliation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut market = Marketplace::genesis(OWNER);
        let mut paid_in: Amount = 0;
        let mut paid_out: Amount = 0;
        let mut drained = false;

        for op in &ops {
            let tx = to_transaction(op, &market);
            let before = (
                market.balance(),
                market.earmarked(),
                market.course_count(),
                market.contract_owner(),
                market.breaker(),
            );

            match market.execute(&tx) {
                Ok(effects) => {
                    let out: Amount = effects.payouts.iter().map(|p| p.amount).sum();
                    prop_assert_eq!(effects.balance + out, before.0 + tx.value);

                    market.apply(&effects);
                    paid_in += tx.value;
                    paid_out += out;
                    if matches!(tx.call, Call::EmergencyWithdraw) && before.1 > 0 {
                        drained = true;
                    }
                }
                Err(e) => {
                    prop_assert!(e.is_rejection());
                    let after = (
                        market.balance(),
                        market.earmarked(),
                        market.course_count(),
                        market.contract_owner(),
                        market.breaker(),
                    );
                    prop_assert_eq!(before, after);
                }
            }

            prop_assert_eq!(Some(market.earmarked()), market.registry().earmarked());
            prop_assert_eq!(market.balance(), paid_in - paid_out);
            prop_assert_eq!(
                market.withdrawable(),
                market.balance().saturating_sub(market.earmarked())
            );
            if !drained || market.earmarked() <= market.balance() {
                prop_assert_eq!(
                    market.balance(),
                    market.earmarked() + market.withdrawable()
                );
            } else {
                // Drained below the refund liability: nothing is withdrawable
                prop_assert_eq!(market.withdrawable(), 0);
                let withdraw = Transaction::new(market.contract_owner(), Call::Withdraw { amount: 1 });
                prop_assert!(market.execute(&withdraw).is_err());
            }
        }
    }

    /// Property: index i always resolves to a record that reports index i
    #[test]
    fn prop_dense_stable_indices(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut market = Marketplace::genesis(OWNER);
        let mut seen: Vec<CourseHash> = Vec::new();

        for op in &ops {
            let tx = to_transaction(op, &market);
            if let Ok(effects) = market.execute(&tx) {
                market.apply(&effects);
            }

            for (i, hash) in seen.iter().enumerate() {
                prop_assert_eq!(market.course_hash_at(i as u64).unwrap(), *hash);
            }
            for i in seen.len() as u64..market.course_count() {
                seen.push(market.course_hash_at(i).unwrap());
            }
            for (i, hash) in seen.iter().enumerate() {
                let record = market.course(hash).found().unwrap();
                prop_assert_eq!(record.index, i as u64);
            }
            prop_assert!(market.course_hash_at(market.course_count()).is_err());
        }
    }

    /// Property: identity hash is keccak256(course_id || buyer)
    #[test]
    fn prop_course_hash_is_packed_keccak(
        id in any::<[u8; 16]>(),
        buyer in any::<[u8; 20]>(),
        other in any::<[u8; 20]>(),
    ) {
        let course_id = CourseId::from_bytes(id);
        let hash = course_hash(&course_id, &Address::from_bytes(buyer));

        let mut packed = id.to_vec();
        packed.extend_from_slice(&buyer);
        prop_assert_eq!(hash.as_bytes(), &keccak256(&packed));
        prop_assert_eq!(hash, course_hash(&course_id, &Address::from_bytes(buyer)));

        if other != buyer {
            prop_assert_ne!(hash, course_hash(&course_id, &Address::from_bytes(other)));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Property: registry order survives a restart
    #[test]
    fn prop_index_survives_reopen(purchases in prop::collection::vec((0u8..3, 0u8..4), 1..12)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, temp_dir) = create_test_ledger().await;

            let mut expected = Vec::new();
            for (buyer, c) in &purchases {
                if let Ok(receipt) = ledger
                    .purchase_course(account(*buyer), course(*c), Proof::ZERO, 100)
                    .await
                {
                    expected.push(receipt.course_hash.unwrap());
                }
            }
            ledger.shutdown().await.unwrap();

            let reopened = open_at(&temp_dir).await;
            prop_assert_eq!(reopened.get_course_count().await.unwrap(), expected.len() as u64);
            for (i, hash) in expected.iter().enumerate() {
                prop_assert_eq!(
                    reopened.get_course_hash_at_index(i as u64).await.unwrap(),
                    *hash
                );
            }
            prop_assert_eq!(reopened.get_balance().await.unwrap(), 100 * expected.len() as Amount);

            reopened.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
