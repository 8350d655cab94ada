pub mod mock_media_client;
pub mod stub_server;
