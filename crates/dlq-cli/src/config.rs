use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use aws_sdk_sqs::config::Credentials;

const DEFAULT_REGION: &str = "us-east-1";
const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

/// Where and how to reach the queue service.
#[derive(Debug, clap::Args)]
pub struct BrokerArgs {
    /// Use static test credentials against LocalStack
    #[arg(long, global = true)]
    pub local: bool,

    /// Endpoint url override (defaults to LocalStack with --local)
    #[arg(long, global = true, env = "DLQ_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Region, falling back to the AWS default chain and then us-east-1
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,
}

impl BrokerArgs {
    pub async fn load(&self) -> SdkConfig {
        let region = RegionProviderChain::first_try(self.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::from_static(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if self.local {
            log::debug!("using static LocalStack credentials");
            loader = loader
                .credentials_provider(Credentials::new("test", "test", None, None, "static"))
                .endpoint_url(self.endpoint.as_deref().unwrap_or(LOCALSTACK_ENDPOINT));
        } else if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        loader.load().await
    }
}
