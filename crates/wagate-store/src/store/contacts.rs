//! Contact list CRUD and search.

use super::{now, page, parse_ts, write_err, Store};
use uuid::Uuid;
use wagate_core::error::WagateError;
use wagate_core::types::Contact;

type ContactRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

const CONTACT_COLUMNS: &str = "id, name, phone, email, notes, created_at, updated_at";

/// Escape `LIKE` wildcards with a backslash, so the term matches literally.
fn like_escape(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Drop the separators people type in phone numbers.
fn strip_phone_formatting(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, ' ' | '+' | '-' | '.' | '(' | ')'))
        .collect()
}

fn contact_from_row(row: ContactRow) -> Result<Contact, WagateError> {
    let (id, name, phone, email, notes, created_at, updated_at) = row;
    Ok(Contact {
        id,
        name,
        phone,
        email,
        notes,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Fields accepted when creating or updating a contact.
///
/// On update, `None` leaves the stored value unchanged. The phone is expected
/// to be normalized by the caller.
#[derive(Debug, Clone, Default)]
pub struct ContactFields<'a> {
    pub name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub email: Option<&'a str>,
    pub notes: Option<&'a str>,
}

impl Store {
    pub async fn create_contact(&self, fields: ContactFields<'_>) -> Result<Contact, WagateError> {
        let name = fields
            .name
            .ok_or_else(|| WagateError::Validation("contact name is required".into()))?;
        let phone = fields
            .phone
            .ok_or_else(|| WagateError::Validation("contact phone is required".into()))?;

        let id = Uuid::new_v4().to_string();
        let ts = now();

        sqlx::query(
            "INSERT INTO contacts (id, name, phone, email, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(phone)
        .bind(fields.email)
        .bind(fields.notes)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err(&format!("contact with phone {phone}"), e))?;

        self.get_contact(&id).await
    }

    pub async fn get_contact(&self, id: &str) -> Result<Contact, WagateError> {
        let row: Option<ContactRow> =
            sqlx::query_as(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| WagateError::Store(format!("get contact failed: {e}")))?;

        row.map(contact_from_row)
            .transpose()?
            .ok_or_else(|| WagateError::NotFound(format!("contact {id}")))
    }

    /// Look up a contact by its (normalized) phone number.
    pub async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, WagateError> {
        let row: Option<ContactRow> =
            sqlx::query_as(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone = ?"))
                .bind(phone)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| WagateError::Store(format!("find contact failed: {e}")))?;

        row.map(contact_from_row).transpose()
    }

    /// List contacts by name, optionally filtered by a case-insensitive
    /// substring of name or phone.
    ///
    /// The search term matches literally. On the phone side, the formatting
    /// that `normalize_phone` drops is ignored, so "+55 11" finds "5511...".
    pub async fn list_contacts(
        &self,
        search: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Contact>, WagateError> {
        let (limit, offset) = page(limit, offset);
        let term = search.map(str::trim).filter(|s| !s.is_empty());
        let name_pattern = term.map(|s| format!("%{}%", like_escape(&s.to_lowercase())));
        let phone_pattern = term
            .map(strip_phone_formatting)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", like_escape(&s)));

        let rows: Vec<ContactRow> = sqlx::query_as(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE ?1 IS NULL \
                OR lower(name) LIKE ?1 ESCAPE '\\' \
                OR phone LIKE ?2 ESCAPE '\\' \
             ORDER BY name COLLATE NOCASE ASC LIMIT ?3 OFFSET ?4"
        ))
        .bind(name_pattern)
        .bind(phone_pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("list contacts failed: {e}")))?;

        rows.into_iter().map(contact_from_row).collect()
    }

    /// Fetch several contacts by id, in the order given. Unknown ids are an error.
    pub async fn get_contacts(&self, ids: &[String]) -> Result<Vec<Contact>, WagateError> {
        let mut contacts = Vec::with_capacity(ids.len());
        for id in ids {
            contacts.push(self.get_contact(id).await?);
        }
        Ok(contacts)
    }

    pub async fn update_contact(
        &self,
        id: &str,
        fields: ContactFields<'_>,
    ) -> Result<Contact, WagateError> {
        let result = sqlx::query(
            "UPDATE contacts SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
             email = COALESCE(?, email), notes = COALESCE(?, notes), updated_at = ? \
             WHERE id = ?",
        )
        .bind(fields.name)
        .bind(fields.phone)
        .bind(fields.email)
        .bind(fields.notes)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err("contact with this phone", e))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("contact {id}")));
        }
        self.get_contact(id).await
    }

    pub async fn delete_contact(&self, id: &str) -> Result<(), WagateError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WagateError::Store(format!("delete contact failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("contact {id}")));
        }
        Ok(())
    }
}
