pub mod models;
pub mod registry;
pub mod services;

use std::sync::Arc;

use tokio::{io, net::TcpListener};

use crate::server::services::ValidationService;

/// Accepts connections forever. Each connection carries one JSON request
/// line and receives the response until the server closes it.
pub async fn serve(listener: TcpListener, service: Arc<ValidationService>) -> io::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let service = service.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = socket.into_split();
            service.handle(read_half, write_half).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            domain::ExecutionOutcome,
            pipeline::validating::Validator,
            traits::executor::Executor,
        },
        dataset::{FsDataset, tests::write_problem},
        server::models::{CancelResponse, RunResponse},
        stubs::executor::ExecutorStub,
    };
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use uuid::Uuid;

    fn outcome(stdout: &str, stderr: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            elapsed_ms: 1,
            timed_out: false,
            entry_point_invoked: true,
        }
    }

    async fn start(
        executor: Arc<dyn Executor>,
        contests: &std::path::Path,
    ) -> (std::net::SocketAddr, Arc<ValidationService>) {
        let validator = Validator::new(Arc::new(FsDataset::new(contests)), executor);
        let service = Arc::new(ValidationService::new(validator, 5000));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, service.clone()));
        (addr, service)
    }

    async fn request(addr: std::net::SocketAddr, body: serde_json::Value) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("{}\n", body).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_streaming_validation() {
        let contests = tempfile::tempdir().unwrap();
        write_problem(
            contests.path(),
            "P1",
            &[
                ("datos001.txt", "3\n", Some("9\n")),
                ("datos002.txt", "4\n", Some("16\n")),
            ],
        );
        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("9\n", "")), Ok(outcome("15\n", ""))],
            Duration::ZERO,
        ));
        let (addr, _) = start(executor, contests.path()).await;

        let response = request(
            addr,
            serde_json::json!({
                "kind": "validate",
                "problem": "P1",
                "code": "int main() {}",
                "accept": "text/event-stream",
            }),
        )
        .await;

        let blocks: Vec<&str> = response.split_terminator("\n\n").collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(
            blocks[0],
            "event: start\ndata: {\"totalCases\":2,\"problem\":\"P1\"}"
        );
        assert!(blocks[1].contains("\"caseName\":\"datos001.txt\",\"result\":\"Accepted\""));
        assert!(blocks[2].contains("\"result\":\"Wrong Answer\""));
        assert!(blocks[2].contains("Line 1: expected [16] / got [15]"));
        assert_eq!(
            blocks[3],
            "event: complete\ndata: {\"totalCases\":2,\"completed\":true}"
        );
    }

    #[tokio::test]
    async fn test_batch_validation() {
        let contests = tempfile::tempdir().unwrap();
        write_problem(contests.path(), "P1", &[("datos001.txt", "3\n", Some("9\n"))]);
        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("", "unhandled exception"))],
            Duration::ZERO,
        ));
        let (addr, _) = start(executor, contests.path()).await;

        let response = request(
            addr,
            serde_json::json!({"kind": "validate", "problem": "P1", "code": "x"}),
        )
        .await;
        let value: serde_json::Value = serde_json::from_str(response.trim()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "case": "datos001.txt",
                "result": "Error",
                "timeMs": value[0]["timeMs"],
                "diff": "",
                "message": "unhandled exception",
            }])
        );
    }

    #[tokio::test]
    async fn test_missing_dataset_uses_error_line() {
        let contests = tempfile::tempdir().unwrap();
        let executor = Arc::new(ExecutorStub::new(vec![], Duration::ZERO));
        let (addr, _) = start(executor.clone(), contests.path()).await;

        let response = request(
            addr,
            serde_json::json!({
                "kind": "validate",
                "problem": "P404",
                "code": "x",
                "accept": "text/event-stream",
            }),
        )
        .await;
        let value: serde_json::Value = serde_json::from_str(response.trim()).unwrap();
        assert!(value["error"].as_str().unwrap().contains("not found"));
        assert!(!response.contains("event:"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_shot_run_uses_request_stdin() {
        let contests = tempfile::tempdir().unwrap();
        let executor = Arc::new(ExecutorStub::new(vec![Ok(outcome("25\n", ""))], Duration::ZERO));
        let (addr, _) = start(executor.clone(), contests.path()).await;

        let response = request(
            addr,
            serde_json::json!({"kind": "run", "code": "x", "stdin": "5\n"}),
        )
        .await;
        let response: RunResponse = serde_json::from_str(response.trim()).unwrap();
        assert_eq!(response.output, "25\n");
        assert!(!response.timed_out);
        assert_eq!(executor.calls(), vec!["5\n"]);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_code_requests() {
        let contests = tempfile::tempdir().unwrap();
        let executor = Arc::new(ExecutorStub::new(vec![], Duration::ZERO));
        let (addr, _) = start(executor, contests.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"not json\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.contains("malformed request"));

        let response = request(
            addr,
            serde_json::json!({"kind": "validate", "problem": "P1", "code": "  "}),
        )
        .await;
        assert!(response.contains("code must not be empty"));
    }

    #[tokio::test]
    async fn test_explicit_cancel_stops_stream() {
        let contests = tempfile::tempdir().unwrap();
        let cases: Vec<(String, &str, Option<&str>)> = (1..=5)
            .map(|i| (format!("datos00{}.txt", i), "1\n", Some("1\n")))
            .collect();
        let cases: Vec<(&str, &str, Option<&str>)> =
            cases.iter().map(|(n, i, e)| (n.as_str(), *i, *e)).collect();
        write_problem(contests.path(), "P1", &cases);

        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("1\n", ""))],
            Duration::from_millis(50),
        ));
        let (addr, service) = start(executor.clone(), contests.path()).await;
        let run_id = Uuid::new_v4();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = serde_json::json!({
            "kind": "validate",
            "problem": "P1",
            "code": "x",
            "accept": "text/event-stream",
            "runId": run_id,
        });
        stream
            .write_all(format!("{}\n", body).as_bytes())
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let mut results = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            if line == "event: case-result" {
                results += 1;
                if results == 2 {
                    break;
                }
            }
        }

        let response = request(
            addr,
            serde_json::json!({"kind": "cancel", "runId": run_id}),
        )
        .await;
        let response: CancelResponse = serde_json::from_str(response.trim()).unwrap();
        assert!(response.cancelled);

        let mut rest = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            rest.push(line);
        }
        assert!(!rest.iter().any(|l| l == "event: complete"));
        assert!(executor.calls().len() < 5);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.runs().is_empty());
    }

    #[tokio::test]
    async fn test_half_closed_client_still_gets_batch() {
        let contests = tempfile::tempdir().unwrap();
        write_problem(contests.path(), "P1", &[("datos001.txt", "3\n", Some("9\n"))]);
        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("9\n", ""))],
            Duration::from_millis(50),
        ));
        let (addr, _) = start(executor, contests.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = serde_json::json!({"kind": "validate", "problem": "P1", "code": "x"});
        stream
            .write_all(format!("{}\n", body).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(response.trim()).unwrap();
        assert_eq!(value[0]["case"], "datos001.txt");
        assert_eq!(value[0]["result"], "Accepted");
    }

    #[tokio::test]
    async fn test_half_closed_client_still_gets_run_response() {
        let contests = tempfile::tempdir().unwrap();
        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("25\n", ""))],
            Duration::from_millis(50),
        ));
        let (addr, _) = start(executor, contests.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = serde_json::json!({"kind": "run", "code": "x", "stdin": "5\n"});
        stream
            .write_all(format!("{}\n", body).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let response: RunResponse = serde_json::from_str(response.trim()).unwrap();
        assert_eq!(response.output, "25\n");
    }

    #[tokio::test]
    async fn test_closed_client_cancels_streaming_run() {
        let contests = tempfile::tempdir().unwrap();
        let cases: Vec<(String, &str, Option<&str>)> = (1..=10)
            .map(|i| (format!("datos{:03}.txt", i), "1\n", Some("1\n")))
            .collect();
        let cases: Vec<(&str, &str, Option<&str>)> =
            cases.iter().map(|(n, i, e)| (n.as_str(), *i, *e)).collect();
        write_problem(contests.path(), "P1", &cases);

        let executor = Arc::new(ExecutorStub::new(
            vec![Ok(outcome("1\n", ""))],
            Duration::from_millis(100),
        ));
        let (addr, service) = start(executor.clone(), contests.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = serde_json::json!({
            "kind": "validate",
            "problem": "P1",
            "code": "x",
            "accept": "text/event-stream",
        });
        stream
            .write_all(format!("{}\n", body).as_bytes())
            .await
            .unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "event: start");
        drop(lines);

        // A full run takes a second; writes fail soon after the close.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(executor.calls().len() < 7);
        assert!(service.runs().is_empty());
    }
}
