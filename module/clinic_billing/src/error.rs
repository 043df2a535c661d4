//! Re-export of the shared error taxonomy, so callers can write
//! `clinic_billing::error::Result` without reaching into `clinic_types`
//! directly.

pub use clinic_types::{ CoreError, CoreResult as Result };
