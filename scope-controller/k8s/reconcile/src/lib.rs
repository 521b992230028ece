#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod binding;
mod error;
pub mod fingerprint;
pub mod gc;
mod key;
pub mod owner;
mod reconcile;
mod router;
pub mod store;


pub use self::{
    binding::{Binding, BindingKind, Scope},
    error::Error,
    key::InstanceKey,
    reconcile::{Outcome, Reconciler},
    router::{TemplateChange, TemplateRouter},
    store::Store,
};
