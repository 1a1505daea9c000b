fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkload_protocol::{ApiResponse, ChunkId, MergeRequest, UploadChunkReply};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key order independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  rust: {reserialized}"
        );
        parsed
    }

    // --- Requests ---

    #[test]
    fn fixture_merge_request() {
        let request: MergeRequest = roundtrip_test("merge_request.json");
        assert_eq!(request, MergeRequest::new("holiday video.mp4", 1024 * 1024));
        assert_eq!(request.missing_field(), None);
    }

    #[test]
    fn merge_request_reports_first_missing_field() {
        let request: MergeRequest =
            serde_json::from_str(r#"{"fileName": "a.bin", "size": 0}"#).unwrap();
        assert_eq!(request.missing_field(), Some("size"));
    }

    // --- Responses ---

    #[test]
    fn fixture_upload_chunk_response() {
        let resp: ApiResponse<UploadChunkReply> = roundtrip_test("upload_chunk_response.json");
        assert!(resp.is_ok());
        let reply = resp.data.unwrap();
        assert!(reply.is_stored());

        let id = ChunkId::parse(&reply.hash, "_").unwrap();
        assert_eq!(id.fingerprint, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(id.index, 3);
    }

    #[test]
    fn fixture_merge_responses() {
        let ok: ApiResponse = roundtrip_test("merge_response_ok.json");
        assert!(ok.is_ok());
        assert_eq!(ok.data, Some(serde_json::json!(true)));

        let missing: ApiResponse = roundtrip_test("merge_response_missing_field.json");
        assert!(missing.is_invalid());
        assert_eq!(missing, ApiResponse::invalid("fileName is required"));

        let failed: ApiResponse = roundtrip_test("merge_response_server_error.json");
        assert!(failed.is_server_error());
    }

    #[test]
    fn envelope_without_code_means_success() {
        let fixture = load_fixture("envelope_without_code.json");
        let resp: ApiResponse<UploadChunkReply> = serde_json::from_value(fixture).unwrap();
        assert!(resp.is_ok());
        // The chunk id may be absent from older servers.
        assert_eq!(resp.data.unwrap(), UploadChunkReply::stored(""));
    }
}
