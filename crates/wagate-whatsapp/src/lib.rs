//! # wagate-whatsapp
//!
//! WhatsApp Web linked-device sessions (via `whatsapp-rust`) for wagate accounts.
//! Device credentials of every account are stored in the shared SQLite pool.

pub mod device_state;
pub mod session;

pub use device_state::SqlxDeviceStore;
pub use session::{generate_qr_image, generate_qr_terminal, WhatsAppSession, WhatsAppSessionFactory};
