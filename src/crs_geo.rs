use std::{fmt, hash::Hash, str::FromStr};

use geo::Coord;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{GeoprocessError, Result};

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

const WKT_ROOTS: [&str; 14] = [
    "GEOGCS",
    "PROJCS",
    "GEOCCS",
    "COMPD_CS",
    "LOCAL_CS",
    "VERT_CS",
    "GEOGCRS",
    "GEODCRS",
    "PROJCRS",
    "COMPOUNDCRS",
    "BOUNDCRS",
    "ENGCRS",
    "VERTCRS",
    "GEOGRAPHICCRS",
];

const GEOGRAPHIC_EPSG: [u32; 14] = [
    4326, 4269, 4258, 4267, 4283, 4617, 4674, 4230, 4019, 4618, 4148, 4322, 4612, 4490,
];

#[derive(thiserror::Error, Debug)]
pub enum ReprojectionError {
    #[error("No transformation available from {from} to {to}")]
    Unsupported { from: String, to: String },
    #[error("Coordinate ({x}, {y}) is outside the domain of {crs}")]
    OutOfDomain { x: f64, y: f64, crs: String },
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjError(#[from] proj::ProjError),
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjCreateError(#[from] proj::ProjCreateError),
}

/// Normalized identity of a [Crs], used for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CrsId {
    Epsg(u32),
    Wkt(String),
    Proj(String),
}

/// Coordinate reference system carried by every dataset.
///
/// Two systems are equal when their normalized identities match, so
/// `EPSG:4326`, `epsg:4326`, `OGC:CRS84` and a WKT whose root authority is
/// EPSG 4326 all compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    definition: String,
    id: CrsId,
}

impl Crs {
    pub fn parse(definition: &str) -> Result<Self> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(GeoprocessError::CrsMismatch(
                "missing CRS identifier".into(),
            ));
        }
        match parse_id(definition) {
            Some(CrsId::Epsg(code)) => Ok(Self::from_epsg(code)),
            Some(id) => Ok(Self {
                definition: definition.to_string(),
                id,
            }),
            None => Err(GeoprocessError::CrsMismatch(format!(
                "unparseable CRS identifier {definition:?}"
            ))),
        }
    }

    pub fn from_epsg(code: u32) -> Self {
        let code = canonical_epsg(code);
        Self {
            definition: format!("EPSG:{code}"),
            id: CrsId::Epsg(code),
        }
    }

    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    pub fn web_mercator() -> Self {
        Self::from_epsg(3857)
    }

    pub fn epsg(&self) -> Option<u32> {
        match self.id {
            CrsId::Epsg(code) => Some(code),
            _ => None,
        }
    }

    /// Text understood by PROJ and GDAL.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Whether coordinates are angular (degrees).
    pub fn is_geographic(&self) -> bool {
        match &self.id {
            CrsId::Epsg(code) => GEOGRAPHIC_EPSG.contains(code),
            CrsId::Wkt(wkt) => {
                let upper = wkt.to_ascii_uppercase();
                upper.starts_with("GEOGCS")
                    || upper.starts_with("GEOGCRS")
                    || upper.starts_with("GEOGRAPHICCRS")
                    || (upper.starts_with("GEODCRS") && upper.contains("ELLIPSOIDAL"))
            }
            CrsId::Proj(proj) => proj.split_whitespace().any(|token| {
                matches!(
                    token,
                    "+proj=longlat" | "+proj=latlong" | "+proj=lonlat" | "+proj=latlon"
                )
            }),
        }
    }

    /// Whether linear units are known to be metres.
    pub fn has_metre_units(&self) -> bool {
        if self.is_geographic() {
            return false;
        }
        match &self.id {
            CrsId::Epsg(code) => matches!(
                code,
                3857 | 3395
                    | 3034
                    | 3035
                    | 2154
                    | 2193
                    | 27700
                    | 5070
                    | 3577
                    | 26901..=26923
                    | 25828..=25838
                    | 31254..=31259
                    | 32601..=32660
                    | 32701..=32760
            ),
            CrsId::Wkt(wkt) => {
                let upper = wkt.to_ascii_uppercase();
                ["UNIT[\"METRE\"", "UNIT[\"METER\"", "LENGTHUNIT[\"METRE\""]
                    .iter()
                    .any(|unit| upper.contains(unit))
            }
            CrsId::Proj(proj) => {
                let mut units = proj
                    .split_whitespace()
                    .filter_map(|token| token.strip_prefix("+units="));
                match units.next() {
                    Some(unit) => unit == "m",
                    None => true,
                }
            }
        }
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Crs {}

impl Hash for Crs {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.definition)
    }
}

impl FromStr for Crs {
    type Err = GeoprocessError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = GeoprocessError;
    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.definition
    }
}

fn canonical_epsg(code: u32) -> u32 {
    match code {
        900913 | 3785 | 102100 | 102113 => 3857,
        code => code,
    }
}

fn parse_id(text: &str) -> Option<CrsId> {
    let upper = text.to_ascii_uppercase();
    if let Some(code) = parse_epsg_code(&upper) {
        return Some(CrsId::Epsg(code));
    }
    if matches!(
        upper.as_str(),
        "CRS84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "URN:OGC:DEF:CRS:OGC::CRS84"
    ) {
        return Some(CrsId::Epsg(4326));
    }
    if text.starts_with('+') {
        return parse_proj(text);
    }
    let is_wkt = WKT_ROOTS.iter().any(|root| {
        upper
            .strip_prefix(root)
            .is_some_and(|rest| rest.trim_start().starts_with(['[', '(']))
    });
    if is_wkt {
        return Some(match root_authority(&upper) {
            Some(code) => CrsId::Epsg(code),
            None => CrsId::Wkt(text.split_whitespace().join(" ")),
        });
    }
    None
}

fn parse_epsg_code(upper: &str) -> Option<u32> {
    let code = if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
        rest.rsplit(':').next()?
    } else if let Some(rest) = upper.strip_prefix("EPSG") {
        rest.trim_start().strip_prefix(':')?
    } else {
        upper
    };
    let code = code.trim();
    if code.is_empty() || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    code.parse().ok().filter(|code| *code > 0)
}

fn parse_proj(text: &str) -> Option<CrsId> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if !tokens.iter().all(|token| token.starts_with('+')) {
        return None;
    }
    if let Some(code) = tokens
        .iter()
        .find_map(|token| token.to_ascii_uppercase().strip_prefix("+INIT=EPSG:").map(str::to_owned))
    {
        return code.parse().ok().map(CrsId::Epsg);
    }
    if !tokens.iter().any(|token| token.starts_with("+proj=")) {
        return None;
    }
    Some(CrsId::Proj(tokens.into_iter().sorted().join(" ")))
}

/// EPSG code attached to the root node of an upper-cased WKT string.
fn root_authority(upper: &str) -> Option<u32> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut previous = ' ';
    let mut code = None;
    for (pos, ch) in upper.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '[' | '(' if !in_quotes => depth += 1,
            ']' | ')' if !in_quotes => depth = depth.saturating_sub(1),
            _ if !in_quotes && depth == 1 && (previous == ',' || previous.is_whitespace()) => {
                for keyword in ["AUTHORITY[", "ID["] {
                    if let Some(rest) = upper[pos..].strip_prefix(keyword) {
                        code = parse_authority(rest).or(code);
                    }
                }
            }
            _ => (),
        }
        previous = ch;
    }
    code
}

fn parse_authority(body: &str) -> Option<u32> {
    let body = &body[..body.find(']')?];
    let (authority, code) = body.split(',').map(|part| part.trim().trim_matches('"')).next_tuple()?;
    if authority != "EPSG" {
        return None;
    }
    code.trim().parse().ok().map(canonical_epsg)
}

/// How the second operand of [reconcile] is brought into the first one's CRS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationPlan {
    Identity,
    Reproject { from: Crs, to: Crs },
}

impl ReconciliationPlan {
    pub fn is_identity(&self) -> bool {
        matches!(self, ReconciliationPlan::Identity)
    }
}

/// Decide how operand `b` is aligned with operand `a`.
///
/// `a` is the anchor: engines pass the raster CRS first, so a mismatch is
/// resolved by reprojecting the vector. Fails when either CRS is missing.
pub fn reconcile(a: Option<&Crs>, b: Option<&Crs>) -> Result<ReconciliationPlan> {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (None, _) => {
            return Err(GeoprocessError::CrsMismatch(
                "first operand has no CRS".into(),
            ))
        }
        (_, None) => {
            return Err(GeoprocessError::CrsMismatch(
                "second operand has no CRS".into(),
            ))
        }
    };
    let plan = if a == b {
        ReconciliationPlan::Identity
    } else {
        ReconciliationPlan::Reproject {
            from: b.clone(),
            to: a.clone(),
        }
    };
    debug!("reconciled {b} with {a}: {plan:?}");
    Ok(plan)
}

pub trait CoordTransformer {
    fn transform(&self, coord: Coord) -> Result<Coord>;
}

/// Source of coordinate transformations between two [Crs].
pub trait Reprojector {
    type Transformer: CoordTransformer;
    fn transformer(&self, from: &Crs, to: &Crs) -> Result<Self::Transformer>;
}

/// Pure Rust reprojection between WGS84 and spherical Web Mercator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinReprojector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTransformer {
    Identity,
    GeographicToWebMercator,
    WebMercatorToGeographic,
}

impl Reprojector for BuiltinReprojector {
    type Transformer = BuiltinTransformer;

    fn transformer(&self, from: &Crs, to: &Crs) -> Result<BuiltinTransformer> {
        if from == to {
            return Ok(BuiltinTransformer::Identity);
        }
        match (from.epsg(), to.epsg()) {
            (Some(4326), Some(3857)) => Ok(BuiltinTransformer::GeographicToWebMercator),
            (Some(3857), Some(4326)) => Ok(BuiltinTransformer::WebMercatorToGeographic),
            _ => Err(ReprojectionError::Unsupported {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into()),
        }
    }
}

impl CoordTransformer for BuiltinTransformer {
    fn transform(&self, coord: Coord) -> Result<Coord> {
        if !(coord.x.is_finite() && coord.y.is_finite()) {
            return Err(ReprojectionError::OutOfDomain {
                x: coord.x,
                y: coord.y,
                crs: format!("{self:?}"),
            }
            .into());
        }
        match self {
            BuiltinTransformer::Identity => Ok(coord),
            BuiltinTransformer::GeographicToWebMercator => {
                if coord.y.abs() > WEB_MERCATOR_MAX_LAT {
                    return Err(ReprojectionError::OutOfDomain {
                        x: coord.x,
                        y: coord.y,
                        crs: "EPSG:3857".into(),
                    }
                    .into());
                }
                let x = WEB_MERCATOR_RADIUS * coord.x.to_radians();
                let y = WEB_MERCATOR_RADIUS
                    * (std::f64::consts::FRAC_PI_4 + coord.y.to_radians() / 2.).tan().ln();
                Ok(Coord { x, y })
            }
            BuiltinTransformer::WebMercatorToGeographic => {
                let x = (coord.x / WEB_MERCATOR_RADIUS).to_degrees();
                let y = (2. * (coord.y / WEB_MERCATOR_RADIUS).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                Ok(Coord { x, y })
            }
        }
    }
}

#[cfg(feature = "proj")]
pub use proj_backend::{ProjReprojector, ProjTransformer};

#[cfg(feature = "proj")]
mod proj_backend {
    use proj::Proj;

    use super::*;

    /// Reprojection through PROJ, for any pair of systems it knows.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ProjReprojector;

    pub struct ProjTransformer(Proj);

    impl Reprojector for ProjReprojector {
        type Transformer = ProjTransformer;

        fn transformer(&self, from: &Crs, to: &Crs) -> Result<ProjTransformer> {
            let proj = Proj::new_known_crs(from.definition(), to.definition(), None)
                .map_err(ReprojectionError::from)?;
            Ok(ProjTransformer(proj))
        }
    }

    impl CoordTransformer for ProjTransformer {
        fn transform(&self, coord: Coord) -> Result<Coord> {
            let (x, y) = self
                .0
                .convert((coord.x, coord.y))
                .map_err(ReprojectionError::from)?;
            Ok(Coord { x, y })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const WGS84_WKT: &str = r#"GEOGCS["WGS 84",
        DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],
        PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],
        UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],
        AUTHORITY["EPSG","4326"]]"#;

    #[rstest]
    #[case("EPSG:4326", 4326)]
    #[case("epsg:32633", 32633)]
    #[case("EPSG : 32633", 32633)]
    #[case("  4326 ", 4326)]
    #[case("urn:ogc:def:crs:EPSG::3857", 3857)]
    #[case("OGC:CRS84", 4326)]
    #[case("EPSG:900913", 3857)]
    #[case("+init=epsg:4326", 4326)]
    #[case(WGS84_WKT, 4326)]
    fn parses_to_epsg(#[case] definition: &str, #[case] code: u32) {
        let crs = Crs::parse(definition).unwrap();
        assert_eq!(crs.epsg(), Some(code));
        assert_eq!(crs, Crs::from_epsg(code));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("not a crs")]
    #[case("EPSG:")]
    #[case("EPSG:abc")]
    #[case("+ellps=WGS84")]
    fn rejects_unparseable(#[case] definition: &str) {
        assert!(matches!(
            Crs::parse(definition),
            Err(GeoprocessError::CrsMismatch(_))
        ));
    }

    #[test]
    fn wkt_without_root_authority_compares_by_text() {
        let a = Crs::parse(r#"PROJCS["local", UNIT["metre",1]]"#).unwrap();
        let b = Crs::parse("PROJCS[\"local\",\n    UNIT[\"metre\",1]]").unwrap();
        let c = Crs::parse(r#"PROJCS["other", UNIT["metre",1]]"#).unwrap();
        assert_eq!(a.epsg(), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.has_metre_units());
    }

    #[test]
    fn nested_authority_is_not_root() {
        let wkt = r#"PROJCS["custom",GEOGCS["WGS 84",AUTHORITY["EPSG","4326"]],UNIT["metre",1]]"#;
        let crs = Crs::parse(wkt).unwrap();
        assert_eq!(crs.epsg(), None);
        assert!(!crs.is_geographic());
    }

    #[test]
    fn proj_strings_are_order_insensitive() {
        let a = Crs::parse("+proj=utm +zone=33 +datum=WGS84").unwrap();
        let b = Crs::parse("+zone=33 +datum=WGS84 +proj=utm").unwrap();
        assert_eq!(a, b);
        assert!(a.has_metre_units());
        assert!(Crs::parse("+proj=longlat +datum=WGS84").unwrap().is_geographic());
    }

    #[rstest]
    #[case(4326, true, false)]
    #[case(3857, false, true)]
    #[case(32633, false, true)]
    #[case(2056, false, false)]
    fn classifies_known_codes(#[case] code: u32, #[case] geographic: bool, #[case] metres: bool) {
        let crs = Crs::from_epsg(code);
        assert_eq!(crs.is_geographic(), geographic);
        assert_eq!(crs.has_metre_units(), metres);
    }

    #[test]
    fn reconcile_identity_for_equivalent_identifiers() {
        let a = Crs::parse("EPSG:4326").unwrap();
        let b = Crs::parse(WGS84_WKT).unwrap();
        let plan = reconcile(Some(&a), Some(&b)).unwrap();
        assert!(plan.is_identity());
    }

    #[test]
    fn reconcile_moves_second_operand() {
        let raster = Crs::from_epsg(3857);
        let vector = Crs::from_epsg(4326);
        let plan = reconcile(Some(&raster), Some(&vector)).unwrap();
        assert_eq!(
            plan,
            ReconciliationPlan::Reproject {
                from: vector,
                to: raster
            }
        );
    }

    #[rstest]
    #[case(None, Some(Crs::wgs84()))]
    #[case(Some(Crs::wgs84()), None)]
    #[case(None, None)]
    fn reconcile_fails_on_missing_crs(#[case] a: Option<Crs>, #[case] b: Option<Crs>) {
        assert!(matches!(
            reconcile(a.as_ref(), b.as_ref()),
            Err(GeoprocessError::CrsMismatch(_))
        ));
    }

    #[test]
    fn web_mercator_round_trip() {
        let forward = BuiltinReprojector
            .transformer(&Crs::wgs84(), &Crs::web_mercator())
            .unwrap();
        let inverse = BuiltinReprojector
            .transformer(&Crs::web_mercator(), &Crs::wgs84())
            .unwrap();
        let coord = Coord { x: 13.4, y: 52.5 };
        let projected = forward.transform(coord).unwrap();
        assert!((projected.x - 1_491_681.0).abs() < 10.);
        let back = inverse.transform(projected).unwrap();
        assert!((back.x - coord.x).abs() < 1e-9);
        assert!((back.y - coord.y).abs() < 1e-9);
    }

    #[test]
    fn web_mercator_rejects_poles() {
        let forward = BuiltinReprojector
            .transformer(&Crs::wgs84(), &Crs::web_mercator())
            .unwrap();
        assert!(forward.transform(Coord { x: 0., y: 89.9 }).is_err());
    }

    #[test]
    fn builtin_rejects_unknown_pairs() {
        let result = BuiltinReprojector.transformer(&Crs::from_epsg(4326), &Crs::from_epsg(32633));
        assert!(matches!(
            result,
            Err(GeoprocessError::Reprojection(
                ReprojectionError::Unsupported { .. }
            ))
        ));
    }

    #[cfg(feature = "proj")]
    #[rstest]
    #[case(Coord { x: 13.4, y: 52.5 })]
    #[case(Coord { x: -73.9, y: 40.7 })]
    #[case(Coord { x: 0., y: 0. })]
    fn proj_agrees_with_builtin(#[case] coord: Coord) {
        let (from, to) = (Crs::wgs84(), Crs::web_mercator());
        let proj = ProjReprojector.transformer(&from, &to).unwrap();
        let builtin = BuiltinReprojector.transformer(&from, &to).unwrap();
        let expected = builtin.transform(coord).unwrap();
        let projected = proj.transform(coord).unwrap();
        assert!((projected.x - expected.x).abs() < 1e-3);
        assert!((projected.y - expected.y).abs() < 1e-3);
    }
}
