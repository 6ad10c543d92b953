use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{Entity, EntityType};
use crate::store::{Mutation, QueuePayload};

/// A person, optionally attached to an [`Account`](super::Account).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    /// Id of the owning account; may be local-origin until that account syncs.
    pub account_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            account_id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            phone: None,
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.full_name();
        writeln!(f, "{}", name)?;
        writeln!(f, "{}", "=".repeat(name.len()))?;
        if let Some(account_id) = &self.account_id {
            writeln!(f, "Account: {}", account_id)?;
        }
        if let Some(email) = &self.email {
            writeln!(f, "Email:   {}", email)?;
        }
        if let Some(phone) = &self.phone {
            writeln!(f, "Phone:   {}", phone)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Entity for Contact {
    type Patch = ContactPatch;

    const ENTITY_TYPE: EntityType = EntityType::Contact;

    fn references_mut(&mut self) -> Vec<&mut String> {
        self.account_id.iter_mut().collect()
    }

    fn patch_references_mut(patch: &mut ContactPatch) -> Vec<&mut String> {
        patch.account_id.iter_mut().collect()
    }

    fn into_payload(mutation: Mutation<Self>) -> QueuePayload {
        QueuePayload::Contact(mutation)
    }

    fn from_payload(payload: QueuePayload) -> Option<Mutation<Self>> {
        match payload {
            QueuePayload::Contact(mutation) => Some(mutation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_references_account() {
        let mut contact = Contact::new("Ada", "Lovelace").with_account("local_abc");
        let refs = contact.references_mut();
        assert_eq!(refs.len(), 1);
        *refs.into_iter().next().unwrap() = "acc_1".to_string();
        assert_eq!(contact.account_id.as_deref(), Some("acc_1"));
    }

    #[test]
    fn test_contact_without_account_has_no_references() {
        let mut contact = Contact::new("Ada", "Lovelace");
        assert!(contact.references_mut().is_empty());

        let mut patch = ContactPatch::default();
        assert!(Contact::patch_references_mut(&mut patch).is_empty());
    }

    #[test]
    fn test_contact_display() {
        let contact = Contact::new("Grace", "Hopper")
            .with_email("grace@example.com")
            .with_account("acc_7");
        let output = format!("{}", contact);
        assert!(output.contains("Grace Hopper"));
        assert!(output.contains("Email:   grace@example.com"));
        assert!(output.contains("Account: acc_7"));
    }
}
