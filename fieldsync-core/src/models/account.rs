use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{Entity, EntityType};
use crate::store::{Mutation, QueuePayload};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub name: String,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            industry: None,
            website: None,
            phone: None,
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;
        if let Some(industry) = &self.industry {
            writeln!(f, "Industry: {}", industry)?;
        }
        if let Some(website) = &self.website {
            writeln!(f, "Website:  {}", website)?;
        }
        if let Some(phone) = &self.phone {
            writeln!(f, "Phone:    {}", phone)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Entity for Account {
    type Patch = AccountPatch;

    const ENTITY_TYPE: EntityType = EntityType::Account;

    fn into_payload(mutation: Mutation<Self>) -> QueuePayload {
        QueuePayload::Account(mutation)
    }

    fn from_payload(payload: QueuePayload) -> Option<Mutation<Self>> {
        match payload {
            QueuePayload::Account(mutation) => Some(mutation),
            _ => None,
        }
    }
}
