//! gRPC transport layer for hashequiv.
//!
//! Each RPC validates and resolves on a blocking worker thread, since the
//! engine and the persistent store do synchronous file I/O. A merge handed
//! to a worker runs to completion even if the client goes away.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::engine::EquivalenceEngine;
use crate::error::{ExecutionError, HashEquivError};
use crate::record::{Equivalence, TaskMetadata};
use crate::request::{GetEquivalentRequest, ReportEquivalentRequest};

/// Generated protobuf messages and service stubs.
pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("hashequiv");
}

use proto::hash_equiv_service_server::{HashEquivService, HashEquivServiceServer};

pub use proto::hash_equiv_service_client::HashEquivServiceClient;

/// gRPC service implementation for hashequiv.
#[derive(Debug, Clone)]
pub struct HashEquivServiceImpl {
    engine: Arc<EquivalenceEngine>,
}

impl HashEquivServiceImpl {
    /// Wrap a shared engine.
    #[must_use]
    pub fn new(engine: Arc<EquivalenceEngine>) -> Self {
        Self { engine }
    }

    /// Turn into a tonic service ready for `Server::add_service`.
    #[must_use]
    pub fn into_server(self) -> HashEquivServiceServer<Self> {
        HashEquivServiceServer::new(self)
    }
}

fn status_from_error(err: HashEquivError) -> Status {
    match err {
        HashEquivError::Validation(v) => Status::invalid_argument(v.to_string()),
        HashEquivError::Transport(t) => Status::unavailable(t.to_string()),
        HashEquivError::Config { .. } => Status::internal(err.to_string()),
        HashEquivError::Internal { message } => Status::internal(message),
        HashEquivError::Execution(e) => match e {
            ExecutionError::StoreUnavailable { .. } => Status::unavailable(e.to_string()),
            ExecutionError::Storage { .. } => Status::internal(e.to_string()),
        },
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, Status>
where
    F: FnOnce() -> Result<T, HashEquivError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Status::internal(format!("engine task failed: {e}")))?
        .map_err(status_from_error)
}

impl From<Equivalence> for proto::Equivalence {
    fn from(eq: Equivalence) -> Self {
        Self {
            taskhash: eq.taskhash,
            method: eq.method,
            unihash: eq.unihash,
        }
    }
}

impl From<proto::GetEquivalentRequest> for GetEquivalentRequest {
    fn from(req: proto::GetEquivalentRequest) -> Self {
        Self {
            method: req.method,
            taskhash: req.taskhash,
        }
    }
}

impl From<proto::ReportEquivalentRequest> for ReportEquivalentRequest {
    fn from(req: proto::ReportEquivalentRequest) -> Self {
        Self {
            method: req.method,
            outhash: req.outhash,
            taskhash: req.taskhash,
            unihash: req.unihash,
            metadata: TaskMetadata {
                owner: req.owner,
                pn: req.pn,
                pv: req.pv,
                pr: req.pr,
                task: req.task,
                outhash_siginfo: req.outhash_siginfo,
            },
        }
    }
}

#[tonic::async_trait]
impl HashEquivService for HashEquivServiceImpl {
    async fn get_equivalent(
        &self,
        request: Request<proto::GetEquivalentRequest>,
    ) -> Result<Response<proto::GetEquivalentResponse>, Status> {
        let req = GetEquivalentRequest::from(request.into_inner());
        let engine = Arc::clone(&self.engine);

        let found = run_blocking(move || engine.get_equivalent(&req)).await?;
        Ok(Response::new(proto::GetEquivalentResponse {
            equivalent: found.map(Into::into),
        }))
    }

    async fn report_equivalent(
        &self,
        request: Request<proto::ReportEquivalentRequest>,
    ) -> Result<Response<proto::ReportEquivalentResponse>, Status> {
        let req = ReportEquivalentRequest::from(request.into_inner());
        let engine = Arc::clone(&self.engine);

        let eq = run_blocking(move || engine.report_equivalent(req)).await?;
        Ok(Response::new(proto::ReportEquivalentResponse {
            equivalent: Some(eq.into()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryEquivalenceStore, StorageError};

    fn make_service() -> HashEquivServiceImpl {
        let store = Arc::new(InMemoryEquivalenceStore::new());
        HashEquivServiceImpl::new(Arc::new(EquivalenceEngine::new(store)))
    }

    fn report(outhash: &str, taskhash: &str, unihash: &str) -> proto::ReportEquivalentRequest {
        proto::ReportEquivalentRequest {
            method: "TestMethod".to_string(),
            outhash: outhash.to_string(),
            taskhash: taskhash.to_string(),
            unihash: unihash.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_unknown_taskhash_returns_empty() {
        let svc = make_service();
        let resp = svc
            .get_equivalent(Request::new(proto::GetEquivalentRequest {
                method: "TestMethod".to_string(),
                taskhash: "missing".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.equivalent.is_none());
    }

    #[tokio::test]
    async fn report_then_get_returns_converged_unihash() {
        let svc = make_service();

        let first = svc
            .report_equivalent(Request::new(report("o", "t1", "u1")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(first.equivalent.unwrap().unihash, "u1");

        let second = svc
            .report_equivalent(Request::new(report("o", "t2", "u2")))
            .await
            .unwrap()
            .into_inner()
            .equivalent
            .unwrap();
        assert_eq!(second.taskhash, "t2");
        assert_eq!(second.unihash, "u1");

        let got = svc
            .get_equivalent(Request::new(proto::GetEquivalentRequest {
                method: "TestMethod".to_string(),
                taskhash: "t2".to_string(),
            }))
            .await
            .unwrap()
            .into_inner()
            .equivalent
            .unwrap();
        assert_eq!(got.unihash, "u1");
        assert_eq!(got.method, "TestMethod");
    }

    #[tokio::test]
    async fn report_metadata_reaches_store() {
        let svc = make_service();
        let mut req = report("o", "t", "u");
        req.pn = Some("zlib".to_string());
        req.owner = Some("builder".to_string());
        svc.report_equivalent(Request::new(req)).await.unwrap();

        let stored = svc.engine.resolve("TestMethod", "t").unwrap().unwrap();
        assert_eq!(stored.metadata.pn.as_deref(), Some("zlib"));
        assert_eq!(stored.metadata.owner.as_deref(), Some("builder"));
    }

    #[tokio::test]
    async fn missing_field_is_invalid_argument() {
        let svc = make_service();
        let status = svc
            .report_equivalent(Request::new(report("o", "", "u")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("taskhash"));
    }

    #[test]
    fn store_failure_maps_to_unavailable() {
        let err: HashEquivError = StorageError::ConnectionError("gone".to_string()).into();
        assert_eq!(status_from_error(err).code(), tonic::Code::Unavailable);

        let err = HashEquivError::storage("segment write failed");
        assert_eq!(status_from_error(err).code(), tonic::Code::Internal);
    }
}
