use crate::amacl::amacl_from_cbor;
use crate::context::SvrContext;
use crate::crypto::CryptoProvider;
use crate::doxm::Doxm;

use super::{EhResult, Method, Request, Response};

impl<D: Doxm, C: CryptoProvider> SvrContext<D, C> {
    pub(crate) fn handle_amacl(&mut self, req: &Request) -> Response {
        match req.method {
            Method::Get => match self.amacl.to_cbor() {
                Ok(payload) => Response::with_payload(EhResult::Ok, payload),
                Err(e) => {
                    tracing::warn!(error = %e, "Encoding amacl for GET failed");
                    Response::status(EhResult::Error)
                }
            },
            Method::Post => {
                let incoming = match amacl_from_cbor(&req.payload) {
                    Ok(list) => list,
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed amacl POST payload");
                        return Response::status(EhResult::Error);
                    }
                };
                match self.amacl.add(&self.db, incoming) {
                    Ok(()) => Response::status(EhResult::ResourceCreated),
                    Err(e) => {
                        tracing::warn!(error = %e, "amacl POST could not be stored");
                        Response::status(EhResult::Error)
                    }
                }
            }
            Method::Put | Method::Delete => Response::status(EhResult::MethodNotAllowed),
        }
    }
}
