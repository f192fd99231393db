//! Merchant directory

use rusqlite::{params, OptionalExtension, Row};

use super::{category_owned, new_id, page, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Merchant, MerchantUpdate, NewMerchant};

fn row_to_merchant(row: &Row) -> rusqlite::Result<Merchant> {
    let created_at: String = row.get(4)?;
    Ok(Merchant {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        default_category_id: row.get(3)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Escape LIKE wildcards in user input
fn like_pattern(q: &str) -> String {
    let escaped = q
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl Database {
    /// List merchants, optionally filtered by a case-insensitive name substring
    pub fn list_merchants(
        &self,
        user_id: &str,
        q: Option<&str>,
        skip: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Merchant>> {
        let (skip, limit) = page(skip, limit);
        let pattern = q.filter(|q| !q.trim().is_empty()).map(like_pattern);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, name, default_category_id, created_at
            FROM merchants
            WHERE user_id = ?1
              AND (?2 IS NULL OR name LIKE ?2 ESCAPE '\')
            ORDER BY name COLLATE NOCASE
            LIMIT ?3 OFFSET ?4
            "#,
        )?;

        let merchants = stmt
            .query_map(params![user_id, pattern, limit, skip], row_to_merchant)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(merchants)
    }

    /// Get a merchant by ID
    pub fn get_merchant(&self, user_id: &str, id: &str) -> Result<Option<Merchant>> {
        let conn = self.conn()?;
        let merchant = conn
            .query_row(
                r#"
                SELECT id, user_id, name, default_category_id, created_at
                FROM merchants WHERE id = ? AND user_id = ?
                "#,
                params![id, user_id],
                row_to_merchant,
            )
            .optional()?;
        Ok(merchant)
    }

    /// Find a merchant by exact name (case-insensitive)
    pub fn find_merchant_by_name(&self, user_id: &str, name: &str) -> Result<Option<Merchant>> {
        let conn = self.conn()?;
        let merchant = conn
            .query_row(
                r#"
                SELECT id, user_id, name, default_category_id, created_at
                FROM merchants WHERE user_id = ? AND name = ? COLLATE NOCASE
                LIMIT 1
                "#,
                params![user_id, name.trim()],
                row_to_merchant,
            )
            .optional()?;
        Ok(merchant)
    }

    /// Create a merchant
    pub fn create_merchant(&self, user_id: &str, merchant: &NewMerchant) -> Result<Merchant> {
        let name = merchant.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Merchant name is required".into()));
        }

        let conn = self.conn()?;
        if let Some(ref category_id) = merchant.default_category_id {
            if !category_owned(&conn, user_id, category_id)? {
                return Err(Error::InvalidData(format!(
                    "Category {} not found",
                    category_id
                )));
            }
        }

        let id = new_id();
        conn.execute(
            "INSERT INTO merchants (id, user_id, name, default_category_id) VALUES (?, ?, ?, ?)",
            params![id, user_id, name, merchant.default_category_id],
        )?;
        drop(conn);

        self.get_merchant(user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Merchant {}", id)))
    }

    /// Update a merchant; `default_category_id: null` clears the default
    pub fn update_merchant(
        &self,
        user_id: &str,
        id: &str,
        update: &MerchantUpdate,
    ) -> Result<Merchant> {
        if let Some(ref name) = update.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidData("Merchant name is required".into()));
            }
        }

        let conn = self.conn()?;
        if let Some(Some(ref category_id)) = update.default_category_id {
            if !category_owned(&conn, user_id, category_id)? {
                return Err(Error::InvalidData(format!(
                    "Category {} not found",
                    category_id
                )));
            }
        }

        let updated = conn.execute(
            r#"
            UPDATE merchants SET
                name = COALESCE(?3, name),
                default_category_id = CASE WHEN ?4 THEN ?5 ELSE default_category_id END
            WHERE id = ?1 AND user_id = ?2
            "#,
            params![
                id,
                user_id,
                update.name.as_deref().map(str::trim),
                update.default_category_id.is_some(),
                update.default_category_id.clone().flatten(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Merchant {}", id)));
        }
        drop(conn);

        self.get_merchant(user_id, id)?
            .ok_or_else(|| Error::NotFound(format!("Merchant {}", id)))
    }

    /// Delete a merchant
    pub fn delete_merchant(&self, user_id: &str, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM merchants WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Merchant {}", id)));
        }
        Ok(())
    }
}
