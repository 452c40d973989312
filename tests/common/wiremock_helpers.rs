use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mounts a DNS-over-HTTPS JSON answer with TXT records for `name` on an
/// existing server. Requests go to `/dns-query?name=<name>&type=TXT`.
pub async fn mount_doh_txt(server: &MockServer, name: &str, txt_records: &[&str]) {
    let answers: Vec<serde_json::Value> = txt_records
        .iter()
        .map(|txt| {
            serde_json::json!({
                "name": name,
                "type": 16,  // TXT record type
                "TTL": 300,
                "data": format!("\"{}\"", txt)
            })
        })
        .collect();

    let response_body = serde_json::json!({
        "Status": 0,
        "TC": false,
        "RD": true,
        "RA": true,
        "Question": [{ "name": name, "type": 16 }],
        "Answer": answers
    });

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .and(query_param("name", name))
        .and(query_param("type", "TXT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(response_body)
                .insert_header("content-type", "application/dns-json"),
        )
        .mount(server)
        .await;
}

/// DoH endpoint URL for a mock server
pub fn doh_url(server: &MockServer) -> String {
    format!("{}/dns-query", server.uri())
}

/// Serves a JSON body at `url_path`, optionally only for a given `resource` query value
pub async fn mount_json(server: &MockServer, url_path: &str, resource: Option<&str>, body: serde_json::Value) {
    let mock = Mock::given(method("GET")).and(path(url_path));
    let mock = match resource {
        Some(resource) => mock.and(query_param("resource", resource)),
        None => mock,
    };
    mock.respond_with(
        ResponseTemplate::new(200)
            .set_body_json(body)
            .insert_header("content-type", "application/json"),
    )
    .mount(server)
    .await;
}

/// Answers every request on `url_path` with the given HTTP status
pub async fn mount_status(server: &MockServer, url_path: &str, status_code: u16) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status_code))
        .mount(server)
        .await;
}
