//! Message templates

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use willkeep_core::{Enrollment, OwnerId, Recipient, Will};

/// A message ready to send
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    /// Message subject (for email)
    pub subject: String,
    /// Message body (plain text)
    pub body: String,
}

/// The release message one recipient receives when a will is delivered.
///
/// Carries the delivery key and the sealed reference; together with the
/// recipient's own key material they unlock the will's content.
pub fn generate_release_message(will: &Will, recipient: &Recipient) -> NotificationMessage {
    let key_section = if recipient.key_material.is_empty() {
        String::new()
    } else {
        format!("\nYour key reference: {}\n", recipient.key_material)
    };

    NotificationMessage {
        subject: format!("willkeep: a message from {}", will.owner.name),
        body: format!(
            r#"Hello {},

{} ({}) asked willkeep to deliver a sealed message to you if they
stopped checking in. Their last check-in was {}, and the deadline
of {} has now passed.

Will ID: {}
{}
Delivery key:
{}

Sealed message (base64):
{}

Keep this message private. Anyone holding the delivery key and the
sealed message can read its contents.

willkeep"#,
            recipient.name,
            will.owner.name,
            will.owner.email,
            will.last_ping.format("%Y-%m-%d %H:%M UTC"),
            will.time_to_delivery.format("%Y-%m-%d %H:%M UTC"),
            will.id,
            key_section,
            hex::encode(&will.delivery_key),
            STANDARD.encode(&will.reference),
        ),
    }
}

/// The one-time enrollment hand-off for a newly created will's owner.
pub fn generate_enrollment_message(
    owner: &OwnerId,
    will_id: &str,
    enrollment: &Enrollment,
) -> NotificationMessage {
    let keys: Vec<String> = enrollment
        .fallback_keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("  {}. {}", i + 1, k))
        .collect();

    NotificationMessage {
        subject: "willkeep: enroll your check-in authenticator".to_string(),
        body: format!(
            r#"Hello {},

Your will {} has been created. Scan this code with an authenticator
app that supports counter-based (HOTP) codes:

{}
Or enter this URI manually:
{}

Fallback keys (each works exactly once, keep them offline):
{}

This is the only time these secrets will be shown.

willkeep"#,
            owner.name,
            will_id,
            enrollment.qr,
            enrollment.uri,
            keys.join("\n"),
        ),
    }
}
