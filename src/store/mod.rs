pub mod attempts;
pub mod kv;
pub mod settings;
pub mod whitelist;
