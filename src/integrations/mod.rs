//! Clients for the controllers and hypervisors deep discovery can ask
//! about the network: Proxmox VE, AVM TR-064 and UISP.
//!
//! All three report transport, auth and parse failures as recoverable
//! errors; a broken integration degrades one evidence source, never the run.

pub mod digest;
pub mod fritzbox;
pub mod proxmox;
pub mod uisp;
