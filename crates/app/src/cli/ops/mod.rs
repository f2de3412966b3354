pub mod connect;
pub mod identity;
pub mod init;
pub mod members;
pub mod serve;
pub mod version;

pub use connect::Connect;
pub use identity::Identity;
pub use init::Init;
pub use members::Members;
pub use serve::Serve;
pub use version::Version;
