use crate::context::SvrContext;
use crate::crypto::CryptoProvider;
use crate::doxm::Doxm;
use crate::pstat::{pstat_from_cbor, PstatError, Transition};

use super::{is_retransmission, Adapter, EhResult, Method, Request, Response};

impl<D: Doxm, C: CryptoProvider> SvrContext<D, C> {
    pub(crate) fn handle_pstat(&mut self, req: &Request) -> Response {
        match req.method {
            Method::Get => match self.pstat.to_cbor() {
                Ok(payload) => Response::with_payload(EhResult::Ok, payload),
                Err(e) => {
                    tracing::warn!(error = %e, "Encoding pstat for GET failed");
                    Response::status(EhResult::Error)
                }
            },
            Method::Post | Method::Put => self.handle_pstat_post(req),
            Method::Delete => Response::status(EhResult::MethodNotAllowed),
        }
    }

    fn handle_pstat_post(&mut self, req: &Request) -> Response {
        let is_dup = is_retransmission(req, self.last_pstat_message_id);
        let result = self.apply_pstat_post(req);

        if result != EhResult::Ok {
            if !self.doxm.is_owned() && (req.peer.adapter == Adapter::Tcp || !is_dup) {
                self.compensate_failed_transfer();
            }
        } else if req.peer.adapter == Adapter::Ip {
            self.last_pstat_message_id = Some(req.message_id);
        }
        Response::status(result)
    }

    fn apply_pstat_post(&mut self, req: &Request) -> EhResult {
        let update = match pstat_from_cbor(&req.payload, self.pstat.pstat()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed pstat POST payload");
                return EhResult::BadRequest;
            }
        };
        let transition = match self.pstat.apply_update(&self.db, &update) {
            Ok(t) => t,
            Err(e @ (PstatError::UnsupportedMode(_) | PstatError::IllegalTransition { .. })) => {
                tracing::warn!(error = %e, "pstat POST rejected");
                return EhResult::BadRequest;
            }
            Err(e) => {
                tracing::warn!(error = %e, "pstat POST could not be stored");
                return EhResult::Error;
            }
        };

        if transition == Transition::Reset {
            if let Err(e) = self.reset_secure_resources() {
                tracing::warn!(error = %e, "Reset to profile failed");
                return EhResult::Error;
            }
        }
        EhResult::Ok
    }
}
