//! Track fixtures and mock-server helpers

use trackfetch::types::{Album, Artist};
use trackfetch::{ItemId, ResolvedItem, SourceInfo};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Track `id` titled `title` by "Integration Artist" on "Integration Album"
pub fn track(id: &str, title: &str) -> ResolvedItem {
    ResolvedItem {
        id: ItemId::from(id),
        title: title.to_string(),
        artists: vec![Artist {
            id: "artist-7".to_string(),
            name: "Integration Artist".to_string(),
        }],
        album: Album {
            id: "album-7".to_string(),
            name: "Integration Album".to_string(),
            cover_url: Some("https://img.example/cover.jpg".to_string()),
        },
        track_no: 1,
        duration_ms: 200_000,
    }
}

/// Deterministic body of `len` bytes
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Source pointing at `/tracks/{id}.mp3` on the mock server
pub fn source_on(server: &MockServer, id: &str, body: &[u8]) -> SourceInfo {
    SourceInfo {
        url: format!("{}/tracks/{}.mp3?sig=abc", server.uri(), id),
        checksum: format!("{:x}", md5::compute(body)),
        size: body.len() as u64,
    }
}

/// Serve the full body of track `id`
pub async fn serve_track(server: &MockServer, id: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/tracks/{}.mp3", id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Serve `body[offset..]` as 206 for a `Range: bytes={offset}-` request on track `id`
pub async fn serve_track_range(server: &MockServer, id: &str, body: &[u8], offset: usize) {
    Mock::given(method("GET"))
        .and(path(format!("/tracks/{}.mp3", id)))
        .and(header("range", format!("bytes={}-", offset).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(body[offset..].to_vec())
                .insert_header(
                    "content-range",
                    format!("bytes {}-{}/{}", offset, body.len() - 1, body.len()).as_str(),
                ),
        )
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;
}
