//! Domain types for the grant-application lifecycle.
//!
//! ## Status as a Finite-State Machine
//!
//! [`ApplicationStatus`] enforces the review/signing lifecycle:
//!
//! ```text
//! Draft ──► Submitted ──► Approved ──► PendingSignature ──► Signed
//!   ▲           │   └───► Rejected
//!   └───────────┘  (withdraw)
//! ```
//!
//! `Rejected` is terminal for that review cycle.  `Signed → Signed` is
//! permitted so a redelivered signing-completion callback reapplies the same
//! state instead of failing.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a grant application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Editable by its owner; not yet visible to reviewers.
    Draft,
    /// Waiting for an admin decision.
    Submitted,
    /// Accepted; signature round not yet started.
    Approved,
    /// Declined with feedback.  Terminal for this cycle.
    Rejected,
    /// Signature envelope sent; waiting on the provider callback.
    PendingSignature,
    /// All parties signed; grantee may submit payment details.
    Signed,
}

impl ApplicationStatus {
    /// Parse the stored snake_case string back into a status.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "pending_signature" => Some(Self::PendingSignature),
            "signed" => Some(Self::Signed),
            _ => None,
        }
    }

    /// Short identifier string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::PendingSignature => "pending_signature",
            Self::Signed => "signed",
        }
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition(&self, next: Self) -> bool {
        matches!(
            (*self, next),
            (Self::Draft, Self::Submitted)
                | (Self::Submitted, Self::Draft)
                | (Self::Submitted, Self::Approved)
                | (Self::Submitted, Self::Rejected)
                | (Self::Approved, Self::PendingSignature)
                | (Self::PendingSignature, Self::Signed)
                | (Self::Signed, Self::Signed)
        )
    }
}

/// Status of a single disbursement tranche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl StepStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Caller role asserted by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Applicant,
    Admin,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "applicant" => Some(Self::Applicant),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller identity, taken from the `x-actor-id` /
/// `x-actor-role` headers set by the auth proxy in front of this service.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn owns(&self, app: &Application) -> bool {
        self.id == app.owner_id
    }
}

/// A grant application as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    pub id: i64,
    pub owner_id: String,
    pub applicant_name: String,
    pub applicant_email: String,
    pub title: String,
    pub description: String,
    /// Requested amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub feedback: Option<String>,
    /// Signing-provider envelope id, set once signing is initiated.
    pub envelope_id: Option<String>,
    pub bank_account_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub upi_id: Option<String>,
    pub has_submitted_payment_details: bool,
    pub payment_completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Application {
    /// Typed view of the stored status string.
    pub fn status(&self) -> Option<ApplicationStatus> {
        ApplicationStatus::from_str(&self.status)
    }
}

/// One tranche of the grant payout.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DisbursementStep {
    pub id: i64,
    pub application_id: i64,
    pub position: i64,
    pub label: String,
    /// Tranche amount in minor units.
    pub amount: i64,
    pub status: String,
    pub completed_at: Option<i64>,
}

/// Form input for creating or editing an application draft.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationForm {
    pub applicant_name: String,
    pub applicant_email: String,
    pub title: String,
    pub description: String,
    pub amount: i64,
    pub currency: Option<String>,
}

/// Bank/UPI details the grantee submits once after signing.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetailsForm {
    pub bank_account_name: String,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub upi_id: Option<String>,
}

/// Split `total` evenly across the four conventional tranches, with any
/// rounding remainder landing on the final tranche.
pub fn split_tranches(total: i64) -> [i64; 4] {
    let base = total / 4;
    [base, base, base, total - base * 3]
}

/// Labels for the four seeded tranches, in routing order.
pub const TRANCHE_LABELS: [&str; 4] = [
    "Initial disbursement",
    "Mid-term milestone",
    "Final milestone",
    "Closing disbursement",
];

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
