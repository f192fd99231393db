//! Category operations

use rusqlite::{params, OptionalExtension, Row};

use super::{category_owned, new_id, Database};
use crate::error::{Error, Result};
use crate::models::{Category, CategoryType, NewCategory};

fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
    let category_type: String = row.get(3)?;
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        category_type: category_type.parse().unwrap_or(CategoryType::Expense),
        parent_category_id: row.get(4)?,
    })
}

impl Database {
    /// List a user's categories
    pub fn list_categories(&self, user_id: &str) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, name, category_type, parent_category_id
            FROM categories
            WHERE user_id = ?
            ORDER BY category_type, name
            "#,
        )?;

        let categories = stmt
            .query_map(params![user_id], row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Get a category by ID
    pub fn get_category(&self, user_id: &str, id: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                r#"
                SELECT id, user_id, name, category_type, parent_category_id
                FROM categories WHERE id = ? AND user_id = ?
                "#,
                params![id, user_id],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Create a category, optionally under a parent of the same user
    pub fn create_category(&self, user_id: &str, category: &NewCategory) -> Result<Category> {
        let name = category.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Category name is required".into()));
        }

        let conn = self.conn()?;
        if let Some(ref parent) = category.parent_category_id {
            if !category_owned(&conn, user_id, parent)? {
                return Err(Error::InvalidData(format!(
                    "Parent category {} not found",
                    parent
                )));
            }
        }

        let id = new_id();
        conn.execute(
            r#"
            INSERT INTO categories (id, user_id, name, category_type, parent_category_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                id,
                user_id,
                name,
                category.category_type.as_str(),
                category.parent_category_id,
            ],
        )?;

        Ok(Category {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            category_type: category.category_type,
            parent_category_id: category.parent_category_id.clone(),
        })
    }

    /// Delete a category
    ///
    /// Child categories become top-level; transactions and merchant defaults
    /// drop the reference (ON DELETE SET NULL).
    pub fn delete_category(&self, user_id: &str, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM categories WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Category {}", id)));
        }
        Ok(())
    }
}
