//! services/contact_service.rs
//! Resolución de destinatarios para los deploys por canal.
//! Lista explícita si viene; si no, contactos activos del workspace,
//! con el segmento como filtro AND adicional.

use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::models::deploy_model::Contact;
use crate::services::idempotency::normalize_recipient;

const SELECT_COLUMNS: &str = r#"
    id, email, phone, first_name, last_name, company, location, industry, job_title
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientField {
    Email,
    Phone,
}

impl RecipientField {
    fn column(&self) -> &'static str {
        match self {
            RecipientField::Email => "email",
            RecipientField::Phone => "phone",
        }
    }

    fn of<'a>(&self, contact: &'a Contact) -> Option<&'a str> {
        match self {
            RecipientField::Email => contact.email.as_deref(),
            RecipientField::Phone => contact.phone.as_deref(),
        }
    }
}

/// Un destinatario ya normalizado con los datos del contacto (si existen).
#[derive(Debug, Clone)]
pub struct Target {
    pub recipient: String,
    pub contact: Contact,
}

#[derive(Clone, Debug)]
pub struct ContactService {
    db_pool: Pool<Sqlite>,
}

impl ContactService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        ContactService { db_pool }
    }

    pub async fn resolve_targets(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        explicit: Option<&[String]>,
        segment: Option<&str>,
        field: RecipientField,
    ) -> Result<Vec<Target>> {
        let targets = match explicit {
            Some(list) => self.targets_from_list(tenant_id, workspace_id, list, field).await?,
            None => {
                self.targets_from_crm(tenant_id, workspace_id, segment, field)
                    .await?
            }
        };

        // Un mismo destinatario no se procesa dos veces en el mismo deploy.
        let mut seen = HashSet::new();
        let deduped: Vec<Target> = targets
            .into_iter()
            .filter(|t| !t.recipient.is_empty() && seen.insert(t.recipient.clone()))
            .collect();

        log::info!(
            "(resolve_targets) workspace={} explicit={} segment={:?} -> {} destinatarios",
            workspace_id,
            explicit.is_some(),
            segment,
            deduped.len()
        );
        Ok(deduped)
    }

    async fn targets_from_list(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        list: &[String],
        field: RecipientField,
    ) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(list.len());
        for raw in list {
            let recipient = normalize_recipient(raw);
            let contact = self
                .find_by_recipient(tenant_id, workspace_id, &recipient, field)
                .await?
                .unwrap_or_else(|| {
                    let mut contact = Contact::default();
                    match field {
                        RecipientField::Email => contact.email = Some(recipient.clone()),
                        RecipientField::Phone => contact.phone = Some(recipient.clone()),
                    }
                    contact
                });
            targets.push(Target { recipient, contact });
        }
        Ok(targets)
    }

    async fn targets_from_crm(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        segment: Option<&str>,
        field: RecipientField,
    ) -> Result<Vec<Target>> {
        let column = field.column();
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM contacts \
             WHERE tenant_id = ?1 AND workspace_id = ?2 AND lifecycle_status = 'active' \
             AND {column} IS NOT NULL AND TRIM({column}) <> ''"
        );
        if segment.is_some() {
            sql.push_str(" AND segment = ?3");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query(&sql).bind(tenant_id).bind(workspace_id);
        if let Some(segment) = segment {
            query = query.bind(segment);
        }
        let rows = query
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al leer contactos del CRM")?;

        let mut targets = Vec::with_capacity(rows.len());
        for row in &rows {
            let contact = row_to_contact(row)?;
            let recipient = field.of(&contact).map(normalize_recipient).unwrap_or_default();
            targets.push(Target { recipient, contact });
        }
        Ok(targets)
    }

    async fn find_by_recipient(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        recipient: &str,
        field: RecipientField,
    ) -> Result<Option<Contact>> {
        let column = field.column();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM contacts \
             WHERE tenant_id = ?1 AND workspace_id = ?2 AND LOWER(TRIM({column})) = ?3 \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(workspace_id)
            .bind(recipient)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al buscar contacto")?;
        row.as_ref().map(row_to_contact).transpose()
    }
}

fn row_to_contact(row: &SqliteRow) -> Result<Contact> {
    Ok(Contact {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        industry: row.try_get("industry")?,
        job_title: row.try_get("job_title")?,
    })
}
