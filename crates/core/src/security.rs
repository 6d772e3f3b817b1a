pub mod encryption;
pub mod hashing;
pub mod jwt;

pub use encryption::EncryptionService;
pub use hashing::PasswordHasher;
pub use jwt::TokenCodec;