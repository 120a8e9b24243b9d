use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use escargot::CargoBuild;
use muster_upstream::UpstreamClient;
use muster_upstream::UpstreamClientError;
use pretty_assertions::assert_eq;
use rmcp::model::ClientCapabilities;
use rmcp::model::Implementation;
use rmcp::model::InitializeRequestParam;
use rmcp::model::ProtocolVersion;
use rmcp::model::ReadResourceRequestParam;
use rmcp::model::ResourceContents;
use serde_json::json;

fn stdio_server_bin() -> anyhow::Result<PathBuf> {
    let build = CargoBuild::new()
        .package("muster-upstream")
        .bin("test_stdio_server")
        .run()?;
    Ok(build.path().to_path_buf())
}

fn init_params() -> InitializeRequestParam {
    InitializeRequestParam {
        meta: None,
        protocol_version: ProtocolVersion::V_2025_06_18,
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "muster-test".to_owned(),
            version: "0.0.0".to_owned(),
            title: Some("muster upstream test".into()),
            description: None,
            icons: None,
            website_url: None,
        },
    }
}

async fn connected_client() -> anyhow::Result<UpstreamClient> {
    let client = UpstreamClient::new_stdio_client(
        "test",
        stdio_server_bin()?.into(),
        Vec::<OsString>::new(),
        None,
    )
    .await?;
    client
        .initialize(init_params(), Some(Duration::from_secs(10)))
        .await?;
    Ok(client)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_and_calls_tools_over_stdio() -> anyhow::Result<()> {
    let client = connected_client().await?;

    let tools = client
        .list_tools(None, Some(Duration::from_secs(5)))
        .await?;
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name.as_ref(), "echo");

    let result = client
        .call_tool(
            "echo".to_string(),
            Some(json!({ "message": "hi" })),
            Some(Duration::from_secs(5)),
        )
        .await?;
    assert_eq!(result.structured_content, Some(json!({ "echo": "hi" })));

    client.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_resources_and_prompts() -> anyhow::Result<()> {
    let client = connected_client().await?;

    let resources = client
        .list_resources(None, Some(Duration::from_secs(5)))
        .await?;
    assert_eq!(resources.resources.len(), 1);
    let uri = resources.resources[0].uri.to_string();

    let read = client
        .read_resource(
            ReadResourceRequestParam { uri: uri.clone() },
            Some(Duration::from_secs(5)),
        )
        .await?;
    match read.contents.first() {
        Some(ResourceContents::TextResourceContents { text, .. }) => {
            assert_eq!(text, "A sample note served by the muster test server.");
        }
        other => panic!("expected text contents, got {other:?}"),
    }

    let prompts = client
        .list_prompts(None, Some(Duration::from_secs(5)))
        .await?;
    assert_eq!(prompts.prompts.len(), 1);
    assert_eq!(prompts.prompts[0].name, "greeting");

    client.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_object_tool_arguments_are_rejected() -> anyhow::Result<()> {
    let client = connected_client().await?;

    let err = client
        .call_tool(
            "echo".to_string(),
            Some(json!(["not", "an", "object"])),
            Some(Duration::from_secs(5)),
        )
        .await
        .expect_err("array arguments must be rejected");
    assert!(matches!(err, UpstreamClientError::InvalidArguments(_)));

    client.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_before_initialize_fail_typed() -> anyhow::Result<()> {
    let client = UpstreamClient::new_stdio_client(
        "test",
        stdio_server_bin()?.into(),
        Vec::<OsString>::new(),
        None,
    )
    .await?;

    let err = client
        .list_tools(None, Some(Duration::from_secs(1)))
        .await
        .expect_err("uninitialized client must refuse requests");
    assert!(matches!(err, UpstreamClientError::NotInitialized));

    client.close().await;
    Ok(())
}
