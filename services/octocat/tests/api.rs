use api_client::mock::{MockResponse, MockService};
use http::{Method, StatusCode};
use octocat::{Error, GithubClient};

fn client(mock: &MockService) -> GithubClient {
    GithubClient::with_inner_service(
        "https://api.github.com/".parse().unwrap(),
        "ghp_token",
        mock.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn fetch_repository() {
    let mock = MockService::new();
    mock.add(
        Method::GET,
        "/repos/octo-org/hello-action",
        MockResponse::new(StatusCode::OK).body(
            r#"{"id": 123, "full_name": "octo-org/hello-action", "owner": {"id": 456, "login": "octo-org"}, "visibility": "public"}"#,
        ),
    );

    let repository = client(&mock)
        .repository("octo-org/hello-action")
        .await
        .unwrap();
    assert_eq!(repository.id, 123);
    assert_eq!(repository.owner.id, 456);
    assert_eq!(repository.visibility.as_deref(), Some("public"));

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("authorization"), Some("Bearer ghp_token"));
    assert_eq!(
        requests[0].header("accept"),
        Some("application/vnd.github.v3+json")
    );
    assert_eq!(requests[0].header("x-github-api-version"), Some("2022-11-28"));
}

#[tokio::test]
async fn repository_errors() {
    let mock = MockService::new();
    mock.add(
        Method::GET,
        "/repos/octo-org/missing",
        MockResponse::new(StatusCode::NOT_FOUND),
    );
    mock.add(
        Method::GET,
        "/repos/octo-org/odd",
        MockResponse::new(StatusCode::OK).body(r#"{"id": 123}"#),
    );

    let err = client(&mock).repository("octo-org/missing").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to fetch repository metadata due to bad status code: 404"
    );

    let err = client(&mock).repository("octo-org/odd").await.unwrap_err();
    assert!(matches!(err, Error::RepositoryFormat(_)));
    assert_eq!(
        err.to_string(),
        "Failed to fetch repository metadata: unexpected response format"
    );
}

#[tokio::test]
async fn fetch_container_registry_url() {
    let mock = MockService::new();
    mock.add(
        Method::GET,
        "/packages/container-registry-url",
        MockResponse::new(StatusCode::OK).body(r#"{"url": "https://ghcr.io/"}"#),
    );

    let url = client(&mock).container_registry_url().await.unwrap();
    assert_eq!(url.as_str(), "https://ghcr.io/");
    assert_eq!(
        mock.requests()[0].header("accept"),
        Some("application/vnd.github+json")
    );
}

#[tokio::test]
async fn container_registry_url_errors() {
    let mock = MockService::new();
    mock.add(
        Method::GET,
        "/packages/container-registry-url",
        MockResponse::new(StatusCode::INTERNAL_SERVER_ERROR),
    );
    let err = client(&mock).container_registry_url().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to fetch container registry url due to bad status code: 500"
    );

    let mock = MockService::new();
    mock.add(
        Method::GET,
        "/packages/container-registry-url",
        MockResponse::new(StatusCode::OK).body(r#"{"url": "not a url"}"#),
    );
    let err = client(&mock).container_registry_url().await.unwrap_err();
    assert!(matches!(err, Error::RegistryFormat(_)));
}
