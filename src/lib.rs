pub mod directory;
pub mod error;
pub mod shared;
pub mod tickets;

pub use directory::{Actor, Directory, StaffRole, StaticDirectory};
pub use error::TicketError;
pub use shared::config::AppConfig;
pub use shared::enums::{TicketCategory, TicketPriority, TicketStatus, WorkType};
pub use shared::utils::{create_pool, run_migrations, DbPool};
pub use tickets::{AttachmentStore, TicketInput, TicketService, UploadedFile, WorkPattern};
