//! Deterministic baseline catalog for fresh installations: the services,
//! providers, weekly schedules and handoff keywords a new salon starts from.
//! Seeding is skipped entirely once any service row exists.

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedSummary {
    pub seeded: bool,
    pub services: usize,
    pub providers: usize,
    pub keywords: usize,
}

struct ServiceSeed {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    price: &'static str,
    duration_minutes: i64,
    providers: &'static [&'static str],
}

struct ProviderSeed {
    id: &'static str,
    name: &'static str,
    phone: &'static str,
    specialties: &'static [&'static str],
    schedule: &'static [(&'static str, &'static str, &'static str)],
}

const SERVICES: &[ServiceSeed] = &[
    ServiceSeed {
        id: "corte",
        name: "Corte de cabello",
        description: "Corte profesional para dama o caballero",
        price: "150.00",
        duration_minutes: 45,
        providers: &["prov-ana", "prov-luis"],
    },
    ServiceSeed {
        id: "tinte",
        name: "Tinte completo",
        description: "Coloración completa con productos de alta calidad",
        price: "350.00",
        duration_minutes: 120,
        providers: &["prov-ana"],
    },
    ServiceSeed {
        id: "peinado",
        name: "Peinado",
        description: "Peinado para evento especial",
        price: "200.00",
        duration_minutes: 60,
        providers: &["prov-ana", "prov-carmen"],
    },
    ServiceSeed {
        id: "manicure",
        name: "Manicure",
        description: "Manicure tradicional o con esmalte semipermanente",
        price: "120.00",
        duration_minutes: 45,
        providers: &["prov-carmen"],
    },
    ServiceSeed {
        id: "barba",
        name: "Barba",
        description: "Recorte y perfilado de barba",
        price: "80.00",
        duration_minutes: 30,
        providers: &["prov-luis"],
    },
    ServiceSeed {
        id: "tratamiento",
        name: "Tratamiento capilar",
        description: "Tratamiento de hidratación profunda",
        price: "250.00",
        duration_minutes: 45,
        providers: &[],
    },
];

const PROVIDERS: &[ProviderSeed] = &[
    ProviderSeed {
        id: "prov-ana",
        name: "Ana Martínez",
        phone: "+52 555 123 4567",
        specialties: &["Corte", "Color", "Peinados"],
        schedule: &[
            ("monday", "09:00", "18:00"),
            ("tuesday", "09:00", "18:00"),
            ("wednesday", "09:00", "18:00"),
            ("thursday", "09:00", "18:00"),
            ("friday", "09:00", "18:00"),
            ("saturday", "09:00", "15:00"),
        ],
    },
    ProviderSeed {
        id: "prov-luis",
        name: "Luis García",
        phone: "+52 555 234 5678",
        specialties: &["Corte", "Barba", "Tratamientos"],
        schedule: &[
            ("monday", "10:00", "19:00"),
            ("tuesday", "10:00", "19:00"),
            ("wednesday", "10:00", "19:00"),
            ("thursday", "10:00", "19:00"),
            ("friday", "10:00", "19:00"),
            ("saturday", "10:00", "16:00"),
        ],
    },
    ProviderSeed {
        id: "prov-carmen",
        name: "Carmen Ruiz",
        phone: "+52 555 345 6789",
        specialties: &["Manicure", "Pedicure", "Peinados"],
        schedule: &[
            ("monday", "09:00", "17:00"),
            ("tuesday", "09:00", "17:00"),
            ("wednesday", "09:00", "17:00"),
            ("thursday", "09:00", "17:00"),
            ("friday", "09:00", "17:00"),
        ],
    },
];

const KEYWORDS: &[&str] = &[
    "agente",
    "hablar con humano",
    "hablar con persona",
    "persona real",
    "operador",
    "atención al cliente",
    "queja",
    "reclamación",
    "emergencia",
];

const SEED_TIMESTAMP: &str = "2026-03-01T00:00:00Z";

pub async fn seed_baseline(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM service").fetch_one(pool).await?;
    if existing > 0 {
        return Ok(SeedSummary { seeded: false, services: 0, providers: 0, keywords: 0 });
    }

    for provider in PROVIDERS {
        sqlx::query(
            "INSERT INTO provider (id, name, phone, specialties, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(provider.id)
        .bind(provider.name)
        .bind(provider.phone)
        .bind(serde_json::to_string(provider.specialties).unwrap_or_else(|_| "[]".to_string()))
        .bind(SEED_TIMESTAMP)
        .bind(SEED_TIMESTAMP)
        .execute(pool)
        .await?;

        for (weekday, start, end) in provider.schedule {
            sqlx::query(
                "INSERT INTO provider_schedule (provider_id, weekday, start_time, end_time)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(provider.id)
            .bind(weekday)
            .bind(start)
            .bind(end)
            .execute(pool)
            .await?;
        }
    }

    for service in SERVICES {
        sqlx::query(
            "INSERT INTO service (id, name, description, price, duration_minutes, active,
                                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(service.id)
        .bind(service.name)
        .bind(service.description)
        .bind(service.price)
        .bind(service.duration_minutes)
        .bind(SEED_TIMESTAMP)
        .bind(SEED_TIMESTAMP)
        .execute(pool)
        .await?;

        for provider_id in service.providers {
            sqlx::query(
                "INSERT INTO service_provider (service_id, provider_id) VALUES (?, ?)",
            )
            .bind(service.id)
            .bind(provider_id)
            .execute(pool)
            .await?;
        }
    }

    for keyword in KEYWORDS {
        sqlx::query("INSERT INTO handoff_keyword (keyword, active, created_at) VALUES (?, 1, ?)")
            .bind(keyword)
            .bind(SEED_TIMESTAMP)
            .execute(pool)
            .await?;
    }

    Ok(SeedSummary {
        seeded: true,
        services: SERVICES.len(),
        providers: PROVIDERS.len(),
        keywords: KEYWORDS.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::seed_baseline;
    use crate::migrations;
    use crate::connect_with_settings;

    #[tokio::test]
    async fn seeds_once_then_skips() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = seed_baseline(&pool).await.expect("seed");
        assert!(first.seeded);
        assert_eq!(first.services, 6);
        assert_eq!(first.providers, 3);

        let second = seed_baseline(&pool).await.expect("seed again");
        assert!(!second.seeded);

        let service_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM service").fetch_one(&pool).await.expect("count");
        assert_eq!(service_count, 6);

        pool.close().await;
    }
}
