
use crate::db::ItemRecord;
use crate::types::{Album, Artist, DownloadJob, ItemId, ResolvedItem, SourceInfo};

/// A fully populated job for `id`
pub(super) fn sample_job(id: &str) -> DownloadJob {
    DownloadJob::new(
        ResolvedItem {
            id: ItemId::from(id),
            title: format!("Track {id}"),
            artists: vec![
                Artist {
                    id: "a1".into(),
                    name: "First Artist".into(),
                },
                Artist {
                    id: "a2".into(),
                    name: "Second Artist".into(),
                },
            ],
            album: Album {
                id: "al1".into(),
                name: "Some Album".into(),
                cover_url: Some("https://img.example/cover.jpg".into()),
            },
            track_no: 3,
            duration_ms: 215_000,
        },
        SourceInfo {
            url: format!("https://cdn.example/{id}.flac"),
            checksum: "0123456789abcdef0123456789abcdef".into(),
            size: 4096,
        },
    )
}

pub(super) fn sample_record(id: &str) -> ItemRecord {
    ItemRecord::for_job(
        &sample_job(id),
        std::path::Path::new("/music/First Artist/Some Album/track.flac"),
    )
}
