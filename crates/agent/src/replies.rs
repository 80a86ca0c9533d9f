//! Client-facing reply text. The bot speaks Mexican-Spanish WhatsApp
//! register; every function here is pure formatting over domain values.

use chrono::NaiveTime;

use citabot_core::domain::booking::Booking;
use citabot_core::domain::catalog::{Provider, Service, Weekday};

pub fn services_list(services: &[Service]) -> String {
    if services.is_empty() {
        return "No hay servicios disponibles en este momento.".to_string();
    }

    let mut lines = vec!["Servicios disponibles:".to_string()];
    for service in services {
        let mut line =
            format!("• {}: ${} ({} min)", service.name, service.price, service.duration_minutes);
        if let Some(description) = &service.description {
            line.push_str(&format!("\n  {description}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn providers_list(providers: &[Provider]) -> String {
    if providers.is_empty() {
        return "No hay estilistas disponibles en este momento.".to_string();
    }

    let mut lines = vec!["Nuestros estilistas:".to_string()];
    for provider in providers {
        let mut line = format!("• {}", provider.name);
        if !provider.specialties.is_empty() {
            line.push_str(&format!("\n  Especialidades: {}", provider.specialties.join(", ")));
        }
        if !provider.schedule.is_empty() {
            let days: Vec<&str> =
                provider.schedule.iter().map(|block| weekday_es(block.weekday)).collect();
            line.push_str(&format!("\n  Días: {}", days.join(", ")));
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn availability_free(date: &str, time: &str, duration_minutes: u32) -> String {
    format!(
        "¡Hay disponibilidad! El horario {date} a las {time} está libre para un servicio de \
         {duration_minutes} minutos."
    )
}

pub fn availability_busy(date: &str, time: &str, alternatives: &[NaiveTime]) -> String {
    if alternatives.is_empty() {
        return format!(
            "El horario {date} a las {time} no está disponible y no encontré otros horarios \
             libres para ese día."
        );
    }

    let listed: Vec<String> = alternatives
        .iter()
        .take(5)
        .map(|slot| slot.format("%H:%M").to_string())
        .collect();
    format!(
        "El horario {date} a las {time} no está disponible.\n\nHorarios disponibles para ese \
         día:\n• {}",
        listed.join("\n• ")
    )
}

pub fn booking_confirmed(booking: &Booking, service_names: &[String], provider_name: &str) -> String {
    format!(
        "¡Cita agendada exitosamente!\n\n\
         Fecha: {}\n\
         Hora: {}\n\
         Duración: {} minutos\n\
         Servicios: {}\n\
         Estilista: {}\n\
         Precio total: ${}\n\n\
         ¡Te esperamos!",
        booking.start.format("%Y-%m-%d"),
        booking.start.format("%H:%M"),
        booking.slot().duration_minutes(),
        service_names.join(", "),
        provider_name,
        booking.total_price,
    )
}

pub fn booking_updated(booking: &Booking, changes: &[String]) -> String {
    format!(
        "Cita modificada exitosamente.\n\nCambios realizados:\n• {}\n\n\
         Nueva fecha: {}\nNueva hora: {}\nPrecio total: ${}",
        changes.join("\n• "),
        booking.start.format("%Y-%m-%d"),
        booking.start.format("%H:%M"),
        booking.total_price,
    )
}

pub fn booking_cancelled(booking: &Booking, service_names: &[String]) -> String {
    format!(
        "Cita cancelada.\n\nFecha: {}\nHora: {}\nServicios: {}\n\nEsperamos verte pronto.",
        booking.start.format("%Y-%m-%d"),
        booking.start.format("%H:%M"),
        service_names.join(", "),
    )
}

pub fn appointments_summary(upcoming: &[Booking], past: &[Booking]) -> String {
    if upcoming.is_empty() && past.is_empty() {
        return "No encontré citas registradas para tu número.".to_string();
    }

    let mut lines = vec!["Tus citas:".to_string()];

    if !upcoming.is_empty() {
        lines.push("\nPróximas citas:".to_string());
        for booking in upcoming {
            lines.push(format!(
                "• {} - {} (${})",
                booking.start.format("%Y-%m-%d %H:%M"),
                booking
                    .services
                    .iter()
                    .map(|service| service.0.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                booking.total_price,
            ));
        }
    }

    if !past.is_empty() {
        lines.push("\nÚltimas citas:".to_string());
        for booking in past {
            lines.push(format!(
                "• {} - {}",
                booking.start.format("%Y-%m-%d"),
                booking
                    .services
                    .iter()
                    .map(|service| service.0.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }
    }

    lines.join("\n")
}

pub fn handoff_notice() -> String {
    "Entendido. Un agente humano te atenderá pronto. Por favor espera.".to_string()
}

pub fn unknown_service(name: &str) -> String {
    format!("No encontré el servicio '{name}'. Por favor verifica el nombre.")
}

pub fn unknown_provider(name: &str) -> String {
    format!("No encontré un estilista con el nombre '{name}'.")
}

pub fn no_upcoming_booking() -> String {
    "No encontré citas pendientes para tu número.".to_string()
}

pub fn past_start_time() -> String {
    "No puedo agendar citas para fechas pasadas.".to_string()
}

fn weekday_es(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "Lunes",
        Weekday::Tuesday => "Martes",
        Weekday::Wednesday => "Miércoles",
        Weekday::Thursday => "Jueves",
        Weekday::Friday => "Viernes",
        Weekday::Saturday => "Sábado",
        Weekday::Sunday => "Domingo",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
    use citabot_core::domain::catalog::{ProviderId, Service, ServiceId};

    use super::{availability_busy, booking_confirmed, services_list};

    fn service(id: &str, name: &str, cents: i64, minutes: u32) -> Service {
        Service {
            id: ServiceId(id.to_string()),
            name: name.to_string(),
            description: None,
            price: Decimal::new(cents, 2),
            duration_minutes: minutes,
            eligible_providers: Vec::new(),
            active: true,
        }
    }

    #[test]
    fn services_list_shows_price_and_duration() {
        let listing = services_list(&[
            service("corte", "Corte de cabello", 15_000, 45),
            service("tinte", "Tinte completo", 35_000, 120),
        ]);
        assert!(listing.contains("Corte de cabello: $150.00 (45 min)"));
        assert!(listing.contains("Tinte completo: $350.00 (120 min)"));
    }

    #[test]
    fn busy_reply_offers_at_most_five_alternatives() {
        let alternatives: Vec<NaiveTime> = (10..18)
            .map(|hour| NaiveTime::from_hms_opt(hour, 0, 0).expect("time"))
            .collect();
        let reply = availability_busy("2026-05-04", "16:00", &alternatives);
        assert_eq!(reply.matches("• ").count(), 5);
        assert!(reply.contains("10:00"));
        assert!(!reply.contains("15:00\n• 16:00\n• 17:00"));
    }

    #[test]
    fn confirmation_includes_every_booking_fact() {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 16, 0, 0).single().expect("start");
        let booking = Booking {
            id: BookingId("bk-fmt-1".to_string()),
            client_phone: "5215512345678".to_string(),
            client_name: "Mariana".to_string(),
            provider_id: ProviderId("prov-ana".to_string()),
            services: vec![ServiceId("corte".to_string()), ServiceId("tinte".to_string())],
            start,
            end: start + chrono::Duration::minutes(165),
            total_price: Decimal::new(50_000, 2),
            external_event_ref: Some("evt-1".to_string()),
            status: BookingStatus::Confirmed,
            notes: None,
            created_at: start,
            updated_at: start,
        };

        let reply = booking_confirmed(
            &booking,
            &["Corte de cabello".to_string(), "Tinte completo".to_string()],
            "Ana Martínez",
        );
        assert!(reply.contains("2026-05-04"));
        assert!(reply.contains("16:00"));
        assert!(reply.contains("165 minutos"));
        assert!(reply.contains("Corte de cabello, Tinte completo"));
        assert!(reply.contains("Ana Martínez"));
        assert!(reply.contains("$500.00"));
    }
}
