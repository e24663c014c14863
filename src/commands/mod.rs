pub mod download_videos;
