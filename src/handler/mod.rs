//! Entity handlers: the boundary the network layer calls with decoded
//! requests. Handlers never fail; every outcome is a response code.

pub mod amacl;
pub mod cred;
pub mod pstat;

use uuid::Uuid;

use crate::context::SvrContext;
use crate::crypto::CryptoProvider;
use crate::doxm::Doxm;

pub const OIC_RSRC_CRED_URI: &str = "/oic/sec/cred";
pub const OIC_RSRC_PSTAT_URI: &str = "/oic/sec/pstat";
pub const OIC_RSRC_AMACL_URI: &str = "/oic/sec/amacl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

/// Transport the request arrived on. Message ids are only meaningful on `Ip`
/// (CoAP over UDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Ip,
    Tcp,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: String,
    pub adapter: Adapter,
    /// Authenticated identity of the peer, when the session has one.
    pub identity: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub payload: Vec<u8>,
    pub query: Option<String>,
    pub peer: Peer,
    pub message_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhResult {
    Ok,
    Error,
    ResourceCreated,
    ResourceDeleted,
    Changed,
    BadRequest,
    MethodNotAllowed,
    NotAcceptable,
    ResourceNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: EhResult,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn status(result: EhResult) -> Self {
        Self { result, payload: Vec::new() }
    }

    pub fn with_payload(result: EhResult, payload: Vec<u8>) -> Self {
        Self { result, payload }
    }
}

impl<D: Doxm, C: CryptoProvider> SvrContext<D, C> {
    /// Route a request to the handler for `uri`.
    pub fn handle(&mut self, uri: &str, req: &Request) -> Response {
        tracing::debug!(uri, method = ?req.method, len = req.payload.len(), msg_id = req.message_id, "SVR request");
        let response = match uri {
            OIC_RSRC_CRED_URI => self.handle_cred(req),
            OIC_RSRC_PSTAT_URI => self.handle_pstat(req),
            OIC_RSRC_AMACL_URI => self.handle_amacl(req),
            _ => Response::status(EhResult::ResourceNotFound),
        };
        tracing::debug!(uri, result = ?response.result, "SVR response");
        response
    }

    /// Roll doxm and pstat back so ownership transfer can be retried.
    pub(crate) fn compensate_failed_transfer(&mut self) {
        tracing::warn!("Ownership transfer failed, reverting doxm and pstat");
        self.doxm.restore_to_init_state();
        if let Err(e) = self.pstat.restore_to_init_state(&self.db) {
            tracing::warn!(error = %e, "Could not persist restored pstat");
        }
    }
}

/// A repeat of the last successful request, detectable only over UDP.
pub(crate) fn is_retransmission(req: &Request, last_success: Option<u16>) -> bool {
    req.peer.adapter == Adapter::Ip && last_success == Some(req.message_id)
}
