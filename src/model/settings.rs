//! Site configuration singleton.
//!
//! The persisted row is flat on the wire; in memory it is grouped
//! (colors, contact, seo, landing images). Every field has a built-in
//! default so a partially configured remote row, or no row at all, still
//! renders the full site.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire id of the single persisted settings row.
pub const SETTINGS_ROW_ID: i64 = 1;

// ── Groups ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Colors {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            primary: "#c9a96a".into(),
            secondary: "#1a1a1a".into(),
            accent: "#ffffff".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Socials {
    pub instagram: String,
    pub facebook: String,
    pub twitter: String,
    pub linkedin: String,
}

impl Default for Socials {
    fn default() -> Self {
        Self {
            instagram: "#".into(),
            facebook: "#".into(),
            twitter: "#".into(),
            linkedin: "#".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Contact {
    pub phone: String,
    pub email: String,
    pub hours: String,
    pub address: String,
    pub google_map_link: String,
    pub socials: Socials,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            phone: "+1 (555) 000-0000".into(),
            email: "care@metroblackline.com".into(),
            hours: "Mon - Sun: 7AM - 8PM".into(),
            address: "Addis Ababa, Ethiopia".into(),
            google_map_link: String::new(),
            socials: Socials::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seo {
    pub title: String,
    pub description: String,
}

impl Default for Seo {
    fn default() -> Self {
        Self {
            title: "Metro Blackline - Premium Mobile Car Wash".into(),
            description: "Top-rated mobile car wash and detailing service in Addis Ababa.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandingImages {
    pub hero: String,
    pub about: String,
    pub membership: String,
    pub contact: String,
}

impl Default for LandingImages {
    fn default() -> Self {
        Self {
            hero: "/images/hero-car.jpg".into(),
            about: "/images/service-wash.jpg".into(),
            membership: "/images/hero-car.jpg".into(),
            contact: "/images/hero-car.jpg".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterSection {
    pub title: String,
    pub links: Vec<FooterLink>,
}

/// A payment method offered at checkout. Record-keeping only; settlement
/// happens elsewhere.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentGateway {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub enabled: bool,
    pub details: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaymentGateway {
    fn core(id: &str, name: &str, description: &str, enabled: bool, details: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: id.into(),
            description: description.into(),
            enabled,
            details: details.into(),
            extra: Map::new(),
        }
    }
}

/// Gateways every deployment offers; saved entries override their fields.
pub fn core_payment_gateways() -> Vec<PaymentGateway> {
    vec![
        PaymentGateway::core(
            "bank",
            "Bank Transfer",
            "Users see bank details for manual transfers.",
            true,
            "100012345678 - MBC PLC",
        ),
        PaymentGateway::core(
            "mobile",
            "Mobile Money",
            "USSD codes or mobile number for wallet payments.",
            true,
            "*889#",
        ),
        PaymentGateway::core(
            "card",
            "Standard Card Processing",
            "Integrated card terminal for direct payments.",
            false,
            "Stripe/Flutterwave",
        ),
    ]
}

// ── SiteSettings ─────────────────────────────────────────────────

/// The configuration singleton in internal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteSettings {
    pub site_name: String,
    pub tagline: String,
    pub description: String,
    pub legal_text: String,
    pub logo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub typography: String,
    pub show_legal: bool,
    pub colors: Colors,
    pub contact: Contact,
    pub seo: Seo,
    pub landing_images: LandingImages,
    pub payment_gateways: Vec<PaymentGateway>,
    pub documents: Vec<Value>,
    pub footer_sections: Vec<FooterSection>,
    #[serde(deserialize_with = "super::lenient_count")]
    pub view_count: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        let link = |label: &str, url: &str| FooterLink {
            label: label.into(),
            url: url.into(),
        };
        Self {
            site_name: "Metro Blackline Care".into(),
            tagline: "Luxury Car Care, Wherever You Are.".into(),
            description: "Experience unparalleled automotive excellence with our premium mobile detailing services.".into(),
            legal_text: "© 2026 Metro Blackline Care. All rights reserved.".into(),
            logo: "M".into(),
            favicon: None,
            typography: "Nunito".into(),
            show_legal: true,
            colors: Colors::default(),
            contact: Contact::default(),
            seo: Seo::default(),
            landing_images: LandingImages::default(),
            payment_gateways: core_payment_gateways(),
            documents: Vec::new(),
            footer_sections: vec![
                FooterSection {
                    title: "Services".into(),
                    links: vec![
                        link("Signature Wash", "#services"),
                        link("Interior Detail", "#services"),
                        link("Ceramic Coating", "#services"),
                    ],
                },
                FooterSection {
                    title: "Company".into(),
                    links: vec![
                        link("About Us", "#about"),
                        link("Contact", "#contact"),
                        link("Careers", "#"),
                    ],
                },
            ],
            view_count: 0,
            extra: Map::new(),
        }
    }
}

impl SiteSettings {
    /// Build settings from an internal-form row, field by field over the
    /// built-in defaults. Absent or null fields keep their default; nested
    /// groups merge per field; saved payment gateways overlay the core set.
    ///
    /// Never fails: a field whose value does not fit its type keeps its
    /// default while every other field of the row still applies.
    pub fn from_internal(internal: &Value) -> Self {
        let defaults = Self::default().to_value();
        let mut overlay = internal.clone();
        if let Some(object) = overlay.as_object_mut() {
            if let Some(Value::Array(saved)) = object.remove("paymentGateways") {
                object.insert("paymentGateways".into(), Value::Array(merge_gateways(&saved)));
            }
        }

        let mut merged = defaults.clone();
        deep_merge(&mut merged, &overlay);
        match serde_json::from_value(merged) {
            Ok(settings) => return settings,
            Err(e) => tracing::warn!("Settings row does not fit, applying field by field: {e}"),
        }

        let mut fitted = defaults;
        if let Some(fields) = overlay.as_object() {
            merge_fitting(&mut fitted, "", fields);
        }
        serde_json::from_value(fitted).unwrap_or_default()
    }

    /// Apply a partial internal-form object on top of these settings.
    pub fn with_patch(&self, patch: &Value) -> Result<Self, serde_json::Error> {
        let mut merged = self.to_value();
        deep_merge(&mut merged, patch);
        serde_json::from_value(merged)
    }

    /// Internal-form JSON of these settings.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Overlay saved gateway entries onto the core set by id; custom gateways
/// are appended in their saved order.
fn merge_gateways(saved: &[Value]) -> Vec<Value> {
    let core: Vec<Value> = core_payment_gateways()
        .iter()
        .filter_map(|g| serde_json::to_value(g).ok())
        .collect();
    let saved_id = |v: &Value| v.get("id").and_then(Value::as_str).map(str::to_owned);

    let mut merged: Vec<Value> = core
        .into_iter()
        .map(|mut base| {
            let id = saved_id(&base);
            if let Some(entry) = saved.iter().find(|s| saved_id(s).is_some() && saved_id(s) == id) {
                deep_merge(&mut base, entry);
            }
            base
        })
        .collect();

    let core_ids: Vec<String> = core_payment_gateways().into_iter().map(|g| g.id).collect();
    merged.extend(
        saved
            .iter()
            .filter(|s| !saved_id(s).is_some_and(|id| core_ids.contains(&id)))
            .cloned(),
    );
    merged
}

/// Merge `overlay` into the object at `pointer` one key at a time, keeping
/// only keys after which `root` still decodes as [`SiteSettings`]. A nested
/// group that does not fit as a whole is retried field by field.
fn merge_fitting(root: &mut Value, pointer: &str, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        if value.is_null() {
            continue;
        }
        let path = format!("{pointer}/{}", key.replace('~', "~0").replace('/', "~1"));
        let mut candidate = root.clone();
        let Some(Value::Object(target)) = candidate.pointer_mut(pointer) else {
            continue;
        };
        deep_merge(target.entry(key.clone()).or_insert(Value::Null), value);

        if serde_json::from_value::<SiteSettings>(candidate.clone()).is_ok() {
            *root = candidate;
        } else if let Some(nested) = value.as_object() {
            merge_fitting(root, &path, nested);
        } else {
            tracing::warn!(field = %path, "Settings field has the wrong type, keeping default");
        }
    }
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base
/// value. Null overlay values are skipped, so an overlay can never blank a
/// field out.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    let (Some(base_map), Some(overlay_map)) = (base.as_object_mut(), overlay.as_object()) else {
        if !overlay.is_null() {
            *base = overlay.clone();
        }
        return;
    };

    for (key, value) in overlay_map {
        if value.is_null() {
            continue;
        }
        match base_map.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value);
            }
            _ => {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
