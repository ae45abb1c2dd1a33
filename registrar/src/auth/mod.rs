//! Identity from a trusted authenticating proxy.
//!
//! Registrar does not authenticate anyone itself. An upstream proxy verifies
//! the user and forwards their email in a header (`x-registrar-user` by
//! default), plus `x-registrar-phone-verified: true` once their phone number
//! has been verified. Requests must only reach this service through that proxy.
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use registrar::auth::current_user::{AdminUser, CurrentUser};
//!
//! async fn handler(user: CurrentUser) -> String {
//!     user.email
//! }
//!
//! async fn admin_handler(AdminUser(admin): AdminUser) -> String {
//!     admin.email
//! }
//! ```

pub mod current_user;
