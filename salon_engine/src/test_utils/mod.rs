pub mod fixtures;
pub mod mock_gateway;
pub mod prepare_env;
