use crate::adapters::geojson_io::{parse_feature_collection, write_feature_collection};
use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{Epsg, FeatureSet, FetchContext, FetchOutcome, SourceDescriptor};
use crate::domain::ports::DataSource;
use crate::sources::{SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const KIND: &str = "wfs";

#[derive(Debug, Clone)]
struct WfsSettings {
    url: String,
    typename: String,
    version: String,
    output_format: String,
    srsname: String,
    timeout: Duration,
    extra_params: Vec<(String, String)>,
}

impl WfsSettings {
    fn from_config(core: &SourceCore) -> Result<Self> {
        let config = &core.config;
        let url = config.require_str("url")?;
        validation::validate_url("url", url)?;
        Ok(Self {
            url: url.to_string(),
            typename: config.require_str("typename")?.to_string(),
            version: config.param_str("version").unwrap_or("2.0.0").to_string(),
            output_format: config
                .param_str("output_format")
                .unwrap_or("application/json")
                .to_string(),
            srsname: config.param_str("srsname").unwrap_or("EPSG:4326").to_string(),
            timeout: core.timeout(),
            extra_params: config.param_map("params"),
        })
    }

    fn query(&self, bbox: String) -> Vec<(String, String)> {
        // WFS 1.x 使用 typeName，2.0 使用 typeNames
        let typename_key = if self.version.starts_with('1') { "typeName" } else { "typeNames" };
        let mut query = vec![
            ("service".to_string(), "WFS".to_string()),
            ("request".to_string(), "GetFeature".to_string()),
            ("version".to_string(), self.version.clone()),
            (typename_key.to_string(), self.typename.clone()),
            ("outputFormat".to_string(), self.output_format.clone()),
            ("srsName".to_string(), self.srsname.clone()),
            ("bbox".to_string(), bbox),
        ];
        query.extend(self.extra_params.iter().cloned());
        query
    }
}

/// 遠端 WFS 圖層，依 AOI 外包矩形查詢
pub struct WfsSource {
    core: SourceCore,
    settings: Option<WfsSettings>,
    client: Client,
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let checked = WfsSettings::from_config(&core);
    let settings = core.settle(checked);
    Box::new(WfsSource {
        core,
        settings,
        client: services.client.clone(),
    })
}

#[async_trait]
impl DataSource for WfsSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        WfsSettings::from_config(&self.core).map(|_| ())
    }

    async fn fetch_data(&self, context: FetchContext<'_>, workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let settings = self.settings.as_ref().ok_or_else(|| self.core.not_configured())?;
        let bbox = format!("{},EPSG:4326", context.bounds().to_query_string());
        tracing::info!("🌐 [{}] GetFeature {} ({})", self.core.id(), settings.typename, settings.url);

        let response = self
            .client
            .get(&settings.url)
            .query(&settings.query(bbox))
            .timeout(settings.timeout)
            .send()
            .await
            .map_err(|e| self.core.fetch_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.core.fetch_error(format!("HTTP {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| self.core.fetch_error(format!("cannot read response: {}", e)))?;

        let features = parse_feature_collection(&body)
            .map_err(|e| self.core.fetch_error(format!("response is not GeoJSON: {}", e)))?;
        tracing::info!("📥 [{}] {} feature(s) returned", self.core.id(), features.len());
        if features.is_empty() {
            return Ok(FetchOutcome::NoData);
        }

        let output = workspace.temp_path("temp_wfs_", "geojson");
        // 回應未宣告坐標系時以請求的 srsName 為準
        match (features.crs, settings.srsname.parse::<Epsg>()) {
            (None, Ok(requested)) => {
                tracing::debug!("[{}] Response has no crs, using {}", self.core.id(), requested);
                write_feature_collection(&output, &FeatureSet::new(Some(requested), features.features))?;
            }
            _ => tokio::fs::write(&output, body).await?,
        }
        Ok(FetchOutcome::VectorFile(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::geojson_io::read_feature_collection;
    use crate::domain::model::Bounds;
    use crate::sources::test_support::{config, services};
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const POINT_WITHOUT_CRS: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[310000.0,5120000.0]},"properties":{"name":"pont"}}]}"#;

    #[test]
    fn test_query_uses_version_specific_typename() {
        let cfg = config(
            "id = \"roads\"\ntype = \"wfs\"\nurl = \"https://example.com/wfs\"\ntypename = \"roads\"\nversion = \"1.1.0\"\n\n[params]\ncql_filter = \"class=1\"\n",
        );
        let core = SourceCore::new(cfg.clone(), cfg.descriptor(0));
        let settings = WfsSettings::from_config(&core).unwrap();
        let query = settings.query("1,2,3,4,EPSG:4326".to_string());
        assert!(query.contains(&("typeName".to_string(), "roads".to_string())));
        assert!(query.contains(&("cql_filter".to_string(), "class=1".to_string())));
        assert_eq!(settings.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_url_disables() {
        let cfg = config("id = \"roads\"\ntype = \"wfs\"\nurl = \"ftp://example.com\"\ntypename = \"roads\"\n");
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        assert!(!source.is_enabled());
    }

    #[tokio::test]
    async fn test_response_without_crs_takes_requested_srsname() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/wfs")
                .query_param("request", "GetFeature")
                .query_param("srsName", "EPSG:32188");
            then.status(200)
                .header("content-type", "application/json")
                .body(POINT_WITHOUT_CRS);
        });

        let cfg = config(&format!(
            "id = \"ponts\"\ntype = \"wfs\"\nurl = \"{}\"\ntypename = \"ponts\"\nsrsname = \"EPSG:32188\"\n",
            server.url("/wfs")
        ));
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        let work = TempDir::new().unwrap();
        let mut workspace = SourceWorkspace::new(work.path(), "ponts");
        let outcome = source
            .fetch_data(FetchContext::Bounds(Bounds::new(-72.0, 46.0, -71.0, 47.0)), &mut workspace)
            .await
            .unwrap();
        mock.assert();

        let FetchOutcome::VectorFile(path) = outcome else {
            panic!("expected a vector file, got {:?}", outcome);
        };
        let written = read_feature_collection(&path).unwrap();
        assert_eq!(written.crs, Some(Epsg(32188)));
        assert_eq!(written.len(), 1);
        assert_eq!(written.features[0].properties["name"], "pont");
    }
}
