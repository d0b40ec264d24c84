use rusqlite::{params, Row};

use crate::db::models::{CreateRuleInput, TransactionRule};
use crate::db::DbPool;
use crate::error::AppError;

fn validate_input(input: &CreateRuleInput) -> Result<(), AppError> {
    if input.pattern.trim().is_empty() {
        return Err(AppError::Validation("Rule pattern must not be empty".into()));
    }
    if input.category.trim().is_empty() {
        return Err(AppError::Validation("Rule category must not be empty".into()));
    }
    Ok(())
}

fn row_to_rule(row: &Row) -> rusqlite::Result<TransactionRule> {
    Ok(TransactionRule {
        id: row.get("id")?,
        pattern: row.get("pattern")?,
        category: row.get("category")?,
        sort_order: row.get("sort_order")?,
        created_at: row.get("created_at")?,
    })
}

/// All rules in priority order: sort_order ascending, creation time as the
/// tiebreak. This ordering is the match-precedence contract.
pub fn get_all(pool: &DbPool) -> Result<Vec<TransactionRule>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM transaction_rules ORDER BY sort_order ASC, created_at ASC",
    )?;
    let rows = stmt.query_map([], row_to_rule)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<TransactionRule, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM transaction_rules WHERE id = ?1",
        params![id],
        row_to_rule,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Rule {id}")),
        other => AppError::Database(other),
    })
}

/// Create a rule. When no explicit sort_order is given the rule is appended
/// to the end of the list (lowest priority).
pub fn create(pool: &DbPool, input: CreateRuleInput) -> Result<TransactionRule, AppError> {
    validate_input(&input)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let conn = pool.get()?;
    let sort_order = match input.sort_order {
        Some(n) => n,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM transaction_rules",
            [],
            |row| row.get::<_, i64>(0),
        )?,
    };

    conn.execute(
        "INSERT INTO transaction_rules (id, pattern, category, sort_order, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, input.pattern.trim(), input.category.trim(), sort_order, now],
    )?;
    drop(conn);

    get_by_id(pool, &id)
}

pub fn delete(pool: &DbPool, id: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM transaction_rules WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    fn input(pattern: &str, category: &str) -> CreateRuleInput {
        CreateRuleInput {
            pattern: pattern.into(),
            category: category.into(),
            sort_order: None,
        }
    }

    #[test]
    fn test_create_appends_to_list_order() {
        let pool = init_test_db().unwrap();
        let first = create(&pool, input("swiggy", "Food")).unwrap();
        let second = create(&pool, input("uber", "Transport")).unwrap();
        assert!(first.sort_order < second.sort_order);

        let all = get_all(&pool).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);
    }

    #[test]
    fn test_explicit_sort_order_wins() {
        let pool = init_test_db().unwrap();
        create(&pool, input("swiggy", "Food")).unwrap();
        let front = create(
            &pool,
            CreateRuleInput {
                pattern: "rent".into(),
                category: "Housing".into(),
                sort_order: Some(-10),
            },
        )
        .unwrap();

        let all = get_all(&pool).unwrap();
        assert_eq!(all[0].id, front.id);
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let pool = init_test_db().unwrap();
        assert!(create(&pool, input("   ", "Food")).is_err());
        assert!(create(&pool, input("swiggy", "")).is_err());
    }

    #[test]
    fn test_delete() {
        let pool = init_test_db().unwrap();
        let rule = create(&pool, input("swiggy", "Food")).unwrap();
        assert!(delete(&pool, &rule.id).unwrap());
        assert!(!delete(&pool, &rule.id).unwrap());
        assert!(get_by_id(&pool, &rule.id).is_err());
    }
}
