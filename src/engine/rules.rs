use crate::db::models::{PendingTransaction, TransactionRule, TxnStatus};

/// A rule matches when its pattern occurs in the transaction description,
/// case-insensitively.
pub fn rule_matches(rule: &TransactionRule, txn: &PendingTransaction) -> bool {
    txn.description
        .to_lowercase()
        .contains(&rule.pattern.to_lowercase())
}

/// First matching rule in list order. List order defines priority; this
/// tie-break is the documented contract.
pub fn find_match<'a>(
    rules: &'a [TransactionRule],
    txn: &PendingTransaction,
) -> Option<&'a TransactionRule> {
    rules.iter().find(|rule| rule_matches(rule, txn))
}

/// Full recompute: re-evaluate every non-ignored transaction against the
/// complete current rule set, so editing or deleting a rule un-applies stale
/// matches. Returns the IDs of transactions whose categorization changed.
pub fn apply_all(
    transactions: &mut [PendingTransaction],
    rules: &[TransactionRule],
) -> Vec<String> {
    let mut changed = Vec::new();

    for txn in transactions.iter_mut() {
        if txn.status == TxnStatus::Ignored {
            continue;
        }

        let matched = find_match(rules, txn).map(|r| (r.id.clone(), r.category.clone()));
        let before = (txn.status, txn.category.clone(), txn.matched_rule_id.clone());

        // Non-ignored records always accept these transitions
        let _ = txn.reset_categorization();
        if let Some((rule_id, category)) = matched {
            let _ = txn.apply_category(&rule_id, &category);
        }

        if before != (txn.status, txn.category.clone(), txn.matched_rule_id.clone()) {
            changed.push(txn.id.clone());
        }
    }

    changed
}

/// Incremental pass for a newly-added rule: only currently-uncategorized
/// transactions are candidates, already-categorized ones stay untouched.
/// Returns the IDs of transactions the rule captured.
pub fn apply_one(transactions: &mut [PendingTransaction], rule: &TransactionRule) -> Vec<String> {
    let mut changed = Vec::new();

    for txn in transactions.iter_mut() {
        if txn.status != TxnStatus::Uncategorized {
            continue;
        }
        if rule_matches(rule, txn) {
            let _ = txn.apply_category(&rule.id, &rule.category);
            changed.push(txn.id.clone());
        }
    }

    changed
}
