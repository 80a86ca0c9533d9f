use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monday" => Some(Self::Monday),
            "tuesday" => Some(Self::Tuesday),
            "wednesday" => Some(Self::Wednesday),
            "thursday" => Some(Self::Thursday),
            "friday" => Some(Self::Friday),
            "saturday" => Some(Self::Saturday),
            "sunday" => Some(Self::Sunday),
            _ => None,
        }
    }

    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }
}

/// One weekly working window for a provider, e.g. Tuesday 09:00-18:00.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub duration_minutes: u32,
    /// Providers qualified for this service. Empty means any active provider.
    pub eligible_providers: Vec<ProviderId>,
    pub active: bool,
}

impl Service {
    pub fn offered_by(&self, provider: &ProviderId) -> bool {
        self.eligible_providers.is_empty() || self.eligible_providers.contains(provider)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub phone: Option<String>,
    pub specialties: Vec<String>,
    pub schedule: Vec<AvailabilityBlock>,
    pub active: bool,
}

impl Provider {
    pub fn block_for(&self, weekday: Weekday) -> Option<&AvailabilityBlock> {
        self.schedule.iter().find(|block| block.weekday == weekday)
    }

    pub fn works_on(&self, weekday: Weekday) -> bool {
        self.block_for(weekday).is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;
    use rust_decimal::Decimal;

    use super::{AvailabilityBlock, Provider, ProviderId, Service, ServiceId, Weekday};

    fn provider() -> Provider {
        Provider {
            id: ProviderId("prov-ana".to_string()),
            name: "Ana".to_string(),
            phone: None,
            specialties: vec!["colorimetría".to_string()],
            schedule: vec![AvailabilityBlock {
                weekday: Weekday::Tuesday,
                start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
                end: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
            }],
            active: true,
        }
    }

    #[test]
    fn service_without_explicit_roster_is_offered_by_anyone() {
        let service = Service {
            id: ServiceId("corte".to_string()),
            name: "Corte de cabello".to_string(),
            description: None,
            price: Decimal::new(35_000, 2),
            duration_minutes: 60,
            eligible_providers: Vec::new(),
            active: true,
        };
        assert!(service.offered_by(&ProviderId("prov-ana".to_string())));
    }

    #[test]
    fn service_with_roster_restricts_providers() {
        let service = Service {
            id: ServiceId("tinte".to_string()),
            name: "Tinte completo".to_string(),
            description: None,
            price: Decimal::new(120_000, 2),
            duration_minutes: 120,
            eligible_providers: vec![ProviderId("prov-ana".to_string())],
            active: true,
        };
        assert!(service.offered_by(&ProviderId("prov-ana".to_string())));
        assert!(!service.offered_by(&ProviderId("prov-luis".to_string())));
    }

    #[test]
    fn provider_schedule_lookup_by_weekday() {
        let provider = provider();
        assert!(provider.works_on(Weekday::Tuesday));
        assert!(!provider.works_on(Weekday::Sunday));
    }

    #[test]
    fn weekday_round_trips_and_maps_from_chrono() {
        for day in [
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
            Weekday::Sunday,
        ] {
            assert_eq!(Weekday::parse(day.as_str()), Some(day));
        }
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Sat), Weekday::Saturday);
    }
}
