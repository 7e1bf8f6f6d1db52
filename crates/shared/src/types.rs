//! Common types used across Tightship PMS

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Sentinel limit value meaning "unlimited".
///
/// Never compare a limit numerically without checking the sentinel first;
/// use [`PlanLimits::is_unlimited`] or [`ResourceKind`]-aware helpers.
pub const UNLIMITED: i64 = -1;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Organization ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OrgId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Restaurant ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestaurantId(pub Uuid);

impl RestaurantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RestaurantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RestaurantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Product ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub Uuid);

impl ProductId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ProductId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// A gated resource kind, checked against the active plan's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Restaurants,
    Products,
    ApiCalls,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restaurants => "restaurants",
            Self::Products => "products",
            Self::ApiCalls => "api_calls",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "restaurants" => Ok(Self::Restaurants),
            "products" => Ok(Self::Products),
            "api_calls" | "apicalls" => Ok(Self::ApiCalls),
            _ => Err(format!("Invalid resource kind: {}", s)),
        }
    }
}

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    /// Maximum restaurants for this tier
    /// Free (1) → Starter (1) → Professional (5) → Enterprise (unlimited)
    pub fn max_restaurants(&self) -> i64 {
        match self {
            Self::Free => 1,
            Self::Starter => 1,
            Self::Professional => 5,
            Self::Enterprise => UNLIMITED,
        }
    }

    /// Maximum products for this tier
    /// Free (50) → Starter (200) → Professional (1,000) → Enterprise (unlimited)
    pub fn max_products(&self) -> i64 {
        match self {
            Self::Free => 50,
            Self::Starter => 200,
            Self::Professional => 1_000,
            Self::Enterprise => UNLIMITED,
        }
    }

    /// Monthly public API call limit for this tier
    /// Free (1K) → Starter (10K) → Professional (100K) → Enterprise (unlimited)
    pub fn monthly_api_calls(&self) -> i64 {
        match self {
            Self::Free => 1_000,
            Self::Starter => 10_000,
            Self::Professional => 100_000,
            Self::Enterprise => UNLIMITED,
        }
    }

    /// Limit for a resource kind
    pub fn limit_for(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Restaurants => self.max_restaurants(),
            ResourceKind::Products => self.max_products(),
            ResourceKind::ApiCalls => self.monthly_api_calls(),
        }
    }

    /// Default limits bundle for this tier
    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            restaurants: self.max_restaurants(),
            products: self.max_products(),
            api_calls: self.monthly_api_calls(),
        }
    }

    /// Whether POS and delivery-platform sync is available
    pub fn integrations_allowed(&self) -> bool {
        matches!(self, Self::Professional | Self::Enterprise)
    }

    /// Whether CSV menu export is available
    pub fn csv_export_allowed(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Starter => write!(f, "starter"),
            Self::Professional => write!(f, "professional"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

/// Capability flag carried by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    MenuApi,
    CsvExport,
    PosSync,
    DeliveryIntegrations,
    PrioritySupport,
}

impl PlanFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MenuApi => "menu_api",
            Self::CsvExport => "csv_export",
            Self::PosSync => "pos_sync",
            Self::DeliveryIntegrations => "delivery_integrations",
            Self::PrioritySupport => "priority_support",
        }
    }
}

impl std::str::FromStr for PlanFeature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "menu_api" => Ok(Self::MenuApi),
            "csv_export" => Ok(Self::CsvExport),
            "pos_sync" => Ok(Self::PosSync),
            "delivery_integrations" => Ok(Self::DeliveryIntegrations),
            "priority_support" => Ok(Self::PrioritySupport),
            _ => Err(format!("Unknown plan feature: {}", s)),
        }
    }
}

/// Subscription status
///
/// Transitions are one-directional except Active ↔ PastDue (recoverable)
/// and any state → Cancelled (terminal unless explicitly reactivated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
    Unpaid,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Trialing
    }
}

impl SubscriptionStatus {
    /// Whether the subscription grants access to paid features
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }

    /// Whether payment collection is failing on this subscription
    pub fn is_delinquent(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid)
    }

    /// Whether this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a transition from `self` to `to` is expected by the lifecycle.
    ///
    /// The provider stays the source of truth, so an unexpected transition is
    /// logged rather than rejected, with one exception: nothing moves a
    /// subscription out of Cancelled besides explicit reactivation.
    pub fn is_valid_transition(&self, to: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        if *self == to {
            return true;
        }
        match (*self, to) {
            // Anything can cancel
            (_, Cancelled) => true,
            // Terminal: only explicit reactivation leaves Cancelled
            (Cancelled, _) => false,
            (Trialing, Active) | (Trialing, PastDue) | (Trialing, Unpaid) => true,
            (Active, PastDue) => true,
            (PastDue, Active) | (PastDue, Unpaid) => true,
            (Unpaid, Active) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trialing => write!(f, "trialing"),
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unpaid => write!(f, "unpaid"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "unpaid" => Ok(Self::Unpaid),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Plan Limits
// =============================================================================

/// Usage limits carried by a plan. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub restaurants: i64,
    pub products: i64,
    pub api_calls: i64,
}

impl PlanLimits {
    /// Limit for a resource kind
    pub fn limit_for(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Restaurants => self.restaurants,
            ResourceKind::Products => self.products,
            ResourceKind::ApiCalls => self.api_calls,
        }
    }

    /// Whether a resource is unlimited on this plan
    pub fn is_unlimited(&self, kind: ResourceKind) -> bool {
        self.limit_for(kind) == UNLIMITED
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Organization (tenant) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub contact_email: Option<String>,
    pub billing_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Plan catalog row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub tier: PlanTier,
    pub name: String,
    pub price_monthly_cents: i32,
    pub price_yearly_cents: i32,
    pub features: serde_json::Value,
    pub limit_restaurants: i64,
    pub limit_products: i64,
    pub limit_api_calls: i64,
    pub created_at: OffsetDateTime,
}

impl Plan {
    /// Limits bundle for this plan
    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            restaurants: self.limit_restaurants,
            products: self.limit_products,
            api_calls: self.limit_api_calls,
        }
    }

    /// Parsed capability flags; unknown flags are ignored
    pub fn feature_flags(&self) -> Vec<PlanFeature> {
        self.features
            .as_array()
            .map(|flags| {
                flags
                    .iter()
                    .filter_map(|f| f.as_str())
                    .filter_map(|f| f.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_feature(&self, feature: PlanFeature) -> bool {
        self.feature_flags().contains(&feature)
    }
}

/// Subscription model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub payment_failure_count: i32,
    pub last_payment_failure_at: Option<OffsetDateTime>,
    pub grace_period_ends_at: Option<OffsetDateTime>,
    pub provider_event_ts: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Restaurant model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Restaurant {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub address: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Product (menu item) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub price_cents: i32,
    /// VAT rate in basis points (2000 = 20%)
    pub tax_rate_bp: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Product {
    /// Gross price including tax, rounded to the nearest cent
    pub fn price_with_tax_cents(&self) -> i32 {
        let gross = self.price_cents as i64 * (10_000 + self.tax_rate_bp as i64);
        ((gross + 5_000) / 10_000) as i32
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // PlanTier Tests
    // =========================================================================

    #[test]
    fn test_plan_tier_default() {
        assert_eq!(PlanTier::default(), PlanTier::Free);
    }

    #[test]
    fn test_plan_tier_limits() {
        assert_eq!(PlanTier::Free.max_restaurants(), 1);
        assert_eq!(PlanTier::Free.max_products(), 50);
        assert_eq!(PlanTier::Free.monthly_api_calls(), 1_000);
        assert_eq!(PlanTier::Starter.max_products(), 200);
        assert_eq!(PlanTier::Professional.max_restaurants(), 5);
        assert_eq!(PlanTier::Professional.max_products(), 1_000);
        assert_eq!(PlanTier::Enterprise.max_restaurants(), UNLIMITED);
        assert_eq!(PlanTier::Enterprise.max_products(), UNLIMITED);
        assert_eq!(PlanTier::Enterprise.monthly_api_calls(), UNLIMITED);
    }

    #[test]
    fn test_plan_tier_limit_for() {
        assert_eq!(PlanTier::Free.limit_for(ResourceKind::Products), 50);
        assert_eq!(PlanTier::Starter.limit_for(ResourceKind::Restaurants), 1);
        assert_eq!(
            PlanTier::Professional.limit_for(ResourceKind::ApiCalls),
            100_000
        );
    }

    #[test]
    fn test_plan_limits_unlimited_sentinel() {
        let limits = PlanTier::Enterprise.limits();
        assert!(limits.is_unlimited(ResourceKind::Restaurants));
        assert!(limits.is_unlimited(ResourceKind::Products));
        assert!(limits.is_unlimited(ResourceKind::ApiCalls));

        let limits = PlanTier::Free.limits();
        assert!(!limits.is_unlimited(ResourceKind::Products));
        assert_eq!(limits.limit_for(ResourceKind::Products), 50);
    }

    #[test]
    fn test_plan_tier_features() {
        assert!(!PlanTier::Free.integrations_allowed());
        assert!(!PlanTier::Starter.integrations_allowed());
        assert!(PlanTier::Professional.integrations_allowed());
        assert!(PlanTier::Enterprise.integrations_allowed());

        assert!(!PlanTier::Free.csv_export_allowed());
        assert!(PlanTier::Starter.csv_export_allowed());
    }

    #[test]
    fn test_plan_tier_display_and_parse() {
        assert_eq!(format!("{}", PlanTier::Free), "free");
        assert_eq!(format!("{}", PlanTier::Professional), "professional");
        assert_eq!("FREE".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert_eq!(
            "Professional".parse::<PlanTier>().unwrap(),
            PlanTier::Professional
        );
        assert!("gold".parse::<PlanTier>().is_err());
    }

    // =========================================================================
    // SubscriptionStatus Tests
    // =========================================================================

    #[test]
    fn test_subscription_status_default() {
        assert_eq!(SubscriptionStatus::default(), SubscriptionStatus::Trialing);
    }

    #[test]
    fn test_subscription_status_access() {
        assert!(SubscriptionStatus::Trialing.grants_access());
        assert!(SubscriptionStatus::Active.grants_access());
        assert!(SubscriptionStatus::PastDue.grants_access());
        assert!(!SubscriptionStatus::Cancelled.grants_access());
        assert!(!SubscriptionStatus::Unpaid.grants_access());
    }

    #[test]
    fn test_subscription_status_transitions() {
        use SubscriptionStatus::*;

        // Recoverable pair
        assert!(Active.is_valid_transition(PastDue));
        assert!(PastDue.is_valid_transition(Active));

        // Any state can cancel
        assert!(Trialing.is_valid_transition(Cancelled));
        assert!(Active.is_valid_transition(Cancelled));
        assert!(Unpaid.is_valid_transition(Cancelled));

        // Cancelled is terminal
        assert!(!Cancelled.is_valid_transition(Active));
        assert!(!Cancelled.is_valid_transition(PastDue));

        // No going back to trial
        assert!(!Active.is_valid_transition(Trialing));
    }

    #[test]
    fn test_subscription_status_parse_provider_spelling() {
        // Stripe spells it "canceled"; we store "cancelled"
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(format!("{}", SubscriptionStatus::PastDue), "past_due");
    }

    // =========================================================================
    // ResourceKind Tests
    // =========================================================================

    #[test]
    fn test_resource_kind_roundtrip() {
        assert_eq!(
            "restaurants".parse::<ResourceKind>().unwrap(),
            ResourceKind::Restaurants
        );
        assert_eq!(
            "api_calls".parse::<ResourceKind>().unwrap(),
            ResourceKind::ApiCalls
        );
        assert_eq!(ResourceKind::Products.to_string(), "products");
        assert!("tables".parse::<ResourceKind>().is_err());
    }

    // =========================================================================
    // Product Tests
    // =========================================================================

    #[test]
    fn test_product_price_with_tax() {
        let now = OffsetDateTime::now_utc();
        let product = Product {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            name: "Margherita".to_string(),
            category: Some("Pizza".to_string()),
            price_cents: 1000,
            tax_rate_bp: 2000,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(product.price_with_tax_cents(), 1200);
    }

    // =========================================================================
    // ID Wrapper Tests
    // =========================================================================

    #[test]
    fn test_org_id_new() {
        let id1 = OrgId::new();
        let id2 = OrgId::new();
        assert_ne!(id1, id2); // Each new ID should be unique
    }

    #[test]
    fn test_restaurant_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let restaurant_id: RestaurantId = uuid.into();
        assert_eq!(restaurant_id.0, uuid);
    }
}
