pub mod api;

use crate::cli::Args;
use crate::service::ChatService;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    addr: String,
    service: Arc<ChatService>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, service: Arc<ChatService>, args: Args) -> Self {
        Self {
            addr,
            service,
            args,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.addr, self.service.clone(), self.args.clone()).await
    }
}
