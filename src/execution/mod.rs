pub mod client;
pub mod solana;
