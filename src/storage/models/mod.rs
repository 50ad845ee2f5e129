// Storage Models
//
// Data model definitions for the claim reconciliation database

pub mod author_profile;
pub mod change_log;
pub mod claim_log;
pub mod key_value;
pub mod record;
