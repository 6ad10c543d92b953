mod account;
mod contact;

pub use account::{Account, AccountPatch};
pub use contact::{Contact, ContactPatch};
