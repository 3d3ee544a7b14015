mod cloudnc;
mod common;
mod dynasty;
mod municipal_website;
mod tweb;

pub use cloudnc::CloudNcConnector;
pub use dynasty::DynastyConnector;
pub use municipal_website::MunicipalWebsiteConnector;
pub use tweb::TWebConnector;

use std::sync::Arc;
use watchdog_core::{Connector, Gateway, Platform, Source};

/// Builds the `Connector` matching a `Source`'s configured platform.
pub fn connector_for(source: Source, gateway: Arc<dyn Gateway>) -> Box<dyn Connector> {
    match source.platform {
        Platform::CloudNc => Box::new(CloudNcConnector::new(source, gateway)),
        Platform::Dynasty => Box::new(DynastyConnector::new(source, gateway)),
        Platform::TWeb => Box::new(TWebConnector::new(source, gateway)),
        Platform::MunicipalWebsite => Box::new(MunicipalWebsiteConnector::new(source, gateway)),
    }
}
