//! Minimal Antelope (EOS) chain support
//!
//! Name and asset encoding, K1 keys and signatures, binary transaction
//! packing, the HTTP RPC surface and endpoint selection.

pub mod actions;
pub mod asset;
pub mod client;
pub mod endpoint;
pub mod keys;
pub mod name;
pub mod rpc;
pub mod serializer;

pub use asset::{format_eos, Asset};
pub use client::{permission, ChainClient};
pub use endpoint::{EndpointProbe, EndpointSelector};
pub use keys::{PrivateKey, PublicKey, Signature};
pub use name::Name;
pub use rpc::{AccountInfo, AuthorizerAccount, ChainRpc, HttpChainRpc};
