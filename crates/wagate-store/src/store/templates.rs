//! Message template CRUD.

use super::{now, parse_ts, write_err, Store};
use uuid::Uuid;
use wagate_core::error::WagateError;
use wagate_core::types::Template;

type TemplateRow = (String, String, String, String, String);

fn template_from_row(row: TemplateRow) -> Result<Template, WagateError> {
    let (id, name, body, created_at, updated_at) = row;
    Ok(Template {
        id,
        name,
        body,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl Store {
    pub async fn create_template(&self, name: &str, body: &str) -> Result<Template, WagateError> {
        let id = Uuid::new_v4().to_string();
        let ts = now();

        sqlx::query(
            "INSERT INTO templates (id, name, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(body)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err(&format!("template '{name}'"), e))?;

        self.get_template(&id).await
    }

    pub async fn get_template(&self, id: &str) -> Result<Template, WagateError> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, name, body, created_at, updated_at FROM templates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("get template failed: {e}")))?;

        row.map(template_from_row)
            .transpose()?
            .ok_or_else(|| WagateError::NotFound(format!("template {id}")))
    }

    pub async fn get_template_by_name(&self, name: &str) -> Result<Template, WagateError> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, name, body, created_at, updated_at FROM templates WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("get template failed: {e}")))?;

        row.map(template_from_row)
            .transpose()?
            .ok_or_else(|| WagateError::NotFound(format!("template '{name}'")))
    }

    /// All templates, alphabetically.
    pub async fn list_templates(&self) -> Result<Vec<Template>, WagateError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT id, name, body, created_at, updated_at FROM templates \
             ORDER BY name COLLATE NOCASE ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("list templates failed: {e}")))?;

        rows.into_iter().map(template_from_row).collect()
    }

    /// Update name and/or body. `None` leaves a field unchanged.
    pub async fn update_template(
        &self,
        id: &str,
        name: Option<&str>,
        body: Option<&str>,
    ) -> Result<Template, WagateError> {
        let result = sqlx::query(
            "UPDATE templates SET name = COALESCE(?, name), body = COALESCE(?, body), \
             updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(body)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err("template with this name", e))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("template {id}")));
        }
        self.get_template(id).await
    }

    pub async fn delete_template(&self, id: &str) -> Result<(), WagateError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WagateError::Store(format!("delete template failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("template {id}")));
        }
        Ok(())
    }
}
