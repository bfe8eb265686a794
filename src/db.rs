//! Database layer — migrations, queries, and guarded status transitions.
//!
//! Every lifecycle transition is guarded in SQL (`WHERE status = …`) so a
//! stale or concurrent caller affects zero rows instead of clobbering state.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    split_tranches, Application, ApplicationForm, ApplicationStatus, DisbursementStep,
    PaymentDetailsForm, StepStatus, TRANCHE_LABELS,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Application writes
// ─────────────────────────────────────────────────────────

/// Create a new draft application owned by `owner_id`.
pub async fn insert_application(
    pool: &SqlitePool,
    owner_id: &str,
    form: &ApplicationForm,
) -> Result<Application> {
    let ts = now();
    let id = sqlx::query(
        r#"
        INSERT INTO applications
            (owner_id, applicant_name, applicant_email, title, description,
             amount, currency, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8, ?8)
        "#,
    )
    .bind(owner_id)
    .bind(&form.applicant_name)
    .bind(&form.applicant_email)
    .bind(&form.title)
    .bind(&form.description)
    .bind(form.amount)
    .bind(form.currency.as_deref().unwrap_or("INR"))
    .bind(ts)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_application(pool, id)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound.into())
}

/// Owner edit of a draft.  Affects zero rows when the application is not a
/// draft or not owned by the caller.
pub async fn update_draft(
    pool: &SqlitePool,
    id: i64,
    owner_id: &str,
    form: &ApplicationForm,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    applicant_name = ?3, applicant_email = ?4, title = ?5,
               description = ?6, amount = ?7, currency = ?8, updated_at = ?9
        WHERE  id = ?1 AND owner_id = ?2 AND status = 'draft'
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(&form.applicant_name)
    .bind(&form.applicant_email)
    .bind(&form.title)
    .bind(&form.description)
    .bind(form.amount)
    .bind(form.currency.as_deref().unwrap_or("INR"))
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Guarded status transition: only fires when the row currently holds `from`.
pub async fn set_status(
    pool: &SqlitePool,
    id: i64,
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE applications SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
    )
    .bind(id)
    .bind(to.as_str())
    .bind(now())
    .bind(from.as_str())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Reject a submitted application, recording the admin feedback in the same
/// statement.
pub async fn reject_application(pool: &SqlitePool, id: i64, feedback: &str) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    status = 'rejected', feedback = ?2, updated_at = ?3
        WHERE  id = ?1 AND status = 'submitted'
        "#,
    )
    .bind(id)
    .bind(feedback)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Persist the signing-provider envelope id while flipping the application
/// from `approved` to `pending_signature`.
pub async fn attach_envelope(pool: &SqlitePool, id: i64, envelope_id: &str) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    status = 'pending_signature', envelope_id = ?2, updated_at = ?3
        WHERE  id = ?1 AND status = 'approved'
        "#,
    )
    .bind(id)
    .bind(envelope_id)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Webhook path: mark the application linked to `envelope_id` as signed.
///
/// The target status is fixed, so a redelivered completion event reapplies
/// the same update and the operation stays idempotent.  Returns the updated
/// application, or `None` when no row carries that envelope id.
pub async fn complete_by_envelope(
    pool: &SqlitePool,
    envelope_id: &str,
) -> Result<Option<Application>> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    status = 'signed', updated_at = ?2
        WHERE  envelope_id = ?1 AND status IN ('pending_signature', 'signed')
        "#,
    )
    .bind(envelope_id)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Ok(None);
    }
    let app = sqlx::query_as::<_, Application>(
        "SELECT * FROM applications WHERE envelope_id = ?1",
    )
    .bind(envelope_id)
    .fetch_optional(pool)
    .await?;
    Ok(app)
}

/// One-time payment-details submission by the owner of a signed application.
/// The `has_submitted_payment_details` flag flips in the same statement, so a
/// second submission affects zero rows and the stored details never change.
pub async fn submit_payment_details(
    pool: &SqlitePool,
    id: i64,
    owner_id: &str,
    form: &PaymentDetailsForm,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    bank_account_name = ?3, bank_account_number = ?4, bank_ifsc = ?5,
               upi_id = ?6, has_submitted_payment_details = 1, updated_at = ?7
        WHERE  id = ?1 AND owner_id = ?2 AND status = 'signed'
               AND has_submitted_payment_details = 0
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(&form.bank_account_name)
    .bind(&form.bank_account_number)
    .bind(&form.bank_ifsc)
    .bind(&form.upi_id)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Admin flag: the payout for this application has been fully made.
pub async fn mark_payment_completed(pool: &SqlitePool, id: i64) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    payment_completed = 1, updated_at = ?2
        WHERE  id = ?1 AND status = 'signed'
        "#,
    )
    .bind(id)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

// ─────────────────────────────────────────────────────────
// Application reads
// ─────────────────────────────────────────────────────────

pub async fn get_application(pool: &SqlitePool, id: i64) -> Result<Option<Application>> {
    let row = sqlx::query_as::<_, Application>("SELECT * FROM applications WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// All applications, newest first.
pub async fn list_applications(pool: &SqlitePool) -> Result<Vec<Application>> {
    let rows = sqlx::query_as::<_, Application>(
        "SELECT * FROM applications ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Applications owned by `owner_id`, newest first.
pub async fn list_applications_for_owner(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Vec<Application>> {
    let rows = sqlx::query_as::<_, Application>(
        "SELECT * FROM applications WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Disbursement steps
// ─────────────────────────────────────────────────────────

/// Seed the four conventional tranches for a signed application.  A no-op
/// when steps already exist, so webhook redelivery cannot duplicate them.
pub async fn seed_disbursement_steps(pool: &SqlitePool, app: &Application) -> Result<usize> {
    let existing: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM disbursement_steps WHERE application_id = ?1")
            .bind(app.id)
            .fetch_one(pool)
            .await?;
    if existing.0 > 0 {
        return Ok(0);
    }

    let amounts = split_tranches(app.amount);
    let mut inserted = 0usize;
    for (i, label) in TRANCHE_LABELS.iter().enumerate() {
        let rows = sqlx::query(
            r#"
            INSERT OR IGNORE INTO disbursement_steps
                (application_id, position, label, amount, status)
            VALUES (?1, ?2, ?3, ?4, 'pending')
            "#,
        )
        .bind(app.id)
        .bind(i as i64 + 1)
        .bind(label)
        .bind(amounts[i])
        .execute(pool)
        .await?
        .rows_affected();
        inserted += rows as usize;
    }
    Ok(inserted)
}

/// Fetch all tranches for an application, in routing order.
pub async fn get_steps(pool: &SqlitePool, application_id: i64) -> Result<Vec<DisbursementStep>> {
    let rows = sqlx::query_as::<_, DisbursementStep>(
        r#"
        SELECT id, application_id, position, label, amount, status, completed_at
        FROM   disbursement_steps
        WHERE  application_id = ?1
        ORDER  BY position ASC
        "#,
    )
    .bind(application_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Update one tranche's status; stamps `completed_at` only for `completed`.
pub async fn update_step_status(
    pool: &SqlitePool,
    step_id: i64,
    status: StepStatus,
) -> Result<bool> {
    let completed_at = match status {
        StepStatus::Completed => Some(now()),
        _ => None,
    };
    let rows = sqlx::query(
        "UPDATE disbursement_steps SET status = ?2, completed_at = ?3 WHERE id = ?1",
    )
    .bind(step_id)
    .bind(status.as_str())
    .bind(completed_at)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
