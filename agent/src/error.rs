//! gRPC status conversions for agent errors.

use commit_agent_core::error::AgentError;
use tonic::Status;

/// Convert an AgentError to a gRPC Status. The message is the error text.
pub fn agent_error_to_status(err: AgentError) -> Status {
    let message = err.to_string();
    match err {
        AgentError::Grpc(status) => status,
        AgentError::ClientInit { .. } => Status::unavailable(message),
        AgentError::InvalidReference(_) => Status::invalid_argument(message),
        AgentError::ContainerNotFound(_) => Status::not_found(message),
        AgentError::AmbiguousContainerId(_) => Status::failed_precondition(message),
        AgentError::RegistryAuth { .. } => Status::unauthenticated(message),
        AgentError::CredentialDomainMismatch { .. } => Status::permission_denied(message),
        AgentError::RegistryTransport { .. } => Status::unavailable(message),
        AgentError::Ipfs(_) => Status::unavailable(message),
        AgentError::Platform(_) => Status::failed_precondition(message),
        AgentError::Timeout(_) => Status::deadline_exceeded(message),
        AgentError::Config(_) => Status::invalid_argument(message),
        _ => Status::internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_client_init_maps_to_unavailable() {
        let status = agent_error_to_status(AgentError::ClientInit {
            runtime: "Containerd".to_string(),
            message: "connection refused".to_string(),
        });
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "Containerd client init error: connection refused");
    }

    #[test]
    fn test_container_not_found_maps_to_not_found() {
        let status = agent_error_to_status(AgentError::ContainerNotFound("abc".to_string()));
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such container abc");
    }

    #[test]
    fn test_ambiguous_id_maps_to_failed_precondition() {
        let status = agent_error_to_status(AgentError::AmbiguousContainerId("ab".to_string()));
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn test_invalid_reference_maps_to_invalid_argument() {
        let status = agent_error_to_status(AgentError::InvalidReference("UPPER".to_string()));
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_registry_errors() {
        let auth = agent_error_to_status(AgentError::RegistryAuth {
            registry: "registry.local".to_string(),
            message: "401 Unauthorized".to_string(),
        });
        assert_eq!(auth.code(), Code::Unauthenticated);

        let transport = agent_error_to_status(AgentError::RegistryTransport {
            registry: "registry.local".to_string(),
            message: "http: server gave HTTP response to HTTPS client".to_string(),
        });
        assert_eq!(transport.code(), Code::Unavailable);
    }

    #[test]
    fn test_embedded_stream_keeps_daemon_message() {
        let status = agent_error_to_status(AgentError::EmbeddedStream(
            "denied: requested access to the resource is denied".to_string(),
        ));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(
            status.message(),
            "denied: requested access to the resource is denied"
        );
    }

    #[test]
    fn test_timeout_maps_to_deadline_exceeded() {
        let status = agent_error_to_status(AgentError::Timeout("push".to_string()));
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[test]
    fn test_grpc_status_passes_through() {
        let status = agent_error_to_status(AgentError::Grpc(Status::aborted("gone")));
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(status.message(), "gone");
    }
}
