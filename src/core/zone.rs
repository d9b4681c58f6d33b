use crate::domain::model::{Bounds, Epsg, Zone};
use serde::{Deserialize, Serialize};

/// 超出所有經度帶時的處理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePolicy {
    /// 回傳 None，由呼叫端決定失敗
    #[default]
    Strict,
    /// 回傳預設分區
    Lenient,
}

/// 3 度寬經度帶 [west, east) 與對應分區
const LONGITUDE_BANDS: [(f64, f64, u32); 8] = [
    (-58.5, -55.5, 32183),
    (-61.5, -58.5, 32184),
    (-64.5, -61.5, 32185),
    (-67.5, -64.5, 32186),
    (-70.5, -67.5, 32187),
    (-73.5, -70.5, 32188),
    (-76.5, -73.5, 32189),
    (-79.5, -76.5, 32190),
];

fn zone_for_longitude(longitude: f64) -> Option<Zone> {
    LONGITUDE_BANDS
        .iter()
        .find(|(west, east, _)| longitude >= *west && longitude < *east)
        .and_then(|(_, _, code)| Zone::from_epsg(Epsg(*code)))
}

/// 依範圍中心經度選擇投影分區
pub fn select_zone(bounds: &Bounds, policy: ZonePolicy) -> Option<Zone> {
    let center = bounds.center_x();
    let zone = if center.is_finite() {
        zone_for_longitude(center)
    } else {
        None
    };

    match (zone, policy) {
        (Some(zone), _) => Some(zone),
        (None, ZonePolicy::Lenient) => {
            tracing::warn!(
                "⚠️ Center longitude {:.3} outside the zone bands, using default {}",
                center,
                Zone::DEFAULT
            );
            Some(Zone::DEFAULT)
        }
        (None, ZonePolicy::Strict) => {
            tracing::warn!("⚠️ Center longitude {:.3} outside the zone bands", center);
            None
        }
    }
}

/// 自訂分區只接受轄區內有效代碼，無效時忽略並警告
pub fn resolve_override(raw: Option<&str>) -> Option<Zone> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match Zone::normalize(raw) {
        Some(zone) => {
            tracing::info!("📐 Using custom zone {}", zone);
            Some(zone)
        }
        None => {
            tracing::warn!(
                "⚠️ Custom zone '{}' is not one of EPSG:{}..EPSG:{}, ignoring it",
                raw,
                Zone::FIRST_CODE,
                Zone::LAST_CODE
            );
            None
        }
    }
}
