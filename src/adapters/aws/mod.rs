//! AWS adapters: S3 object storage and DynamoDB video records.

pub mod dynamodb;
pub mod s3;

pub use dynamodb::DynamoAdapter;
pub use s3::S3Adapter;
