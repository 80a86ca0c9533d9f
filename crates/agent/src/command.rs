use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use thiserror::Error;

/// The closed set of actions the decision-maker may request. The client's
/// phone never comes from the model; the orchestrator supplies it from the
/// conversation record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    ListServices,
    ListProviders,
    CheckAvailability(CheckAvailabilityArgs),
    CreateBooking(CreateBookingArgs),
    UpdateBooking(UpdateBookingArgs),
    CancelBooking(CancelBookingArgs),
    GetAppointments,
    Reply { text: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckAvailabilityArgs {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: Option<u32>,
    pub provider_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateBookingArgs {
    pub client_name: String,
    pub services: Vec<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub provider_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateBookingArgs {
    pub new_date: Option<NaiveDate>,
    pub new_time: Option<NaiveTime>,
    pub new_services: Option<Vec<String>>,
    pub new_provider_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CancelBookingArgs {
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("decision payload is not a JSON object")]
    NotAnObject,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("command `{command}` is missing required field `{field}`")]
    MissingField { command: &'static str, field: &'static str },
    #[error("command `{command}` has invalid `{field}`: {detail}")]
    InvalidField { command: &'static str, field: &'static str, detail: String },
}

impl AgentCommand {
    /// Strict parse of the decision-maker's JSON output:
    /// `{"command": "...", "args": {...}}`. Unknown commands and malformed
    /// arguments are errors for the caller to surface as validation
    /// failures; nothing here panics on model output.
    pub fn parse(value: &Value) -> Result<Self, CommandParseError> {
        let object = value.as_object().ok_or(CommandParseError::NotAnObject)?;
        let command = object
            .get("command")
            .and_then(Value::as_str)
            .ok_or(CommandParseError::MissingField { command: "<root>", field: "command" })?;
        let args = object.get("args").cloned().unwrap_or_else(|| Value::Object(Default::default()));

        match command {
            "list_services" => Ok(Self::ListServices),
            "list_providers" => Ok(Self::ListProviders),
            "check_availability" => Ok(Self::CheckAvailability(CheckAvailabilityArgs {
                date: required_date("check_availability", &args, "date")?,
                time: required_time("check_availability", &args, "time")?,
                duration_minutes: optional_u32("check_availability", &args, "duration_minutes")?,
                provider_name: optional_string(&args, "provider_name"),
            })),
            "create_booking" => {
                let services = required_string_list("create_booking", &args, "services")?;
                Ok(Self::CreateBooking(CreateBookingArgs {
                    client_name: required_string("create_booking", &args, "client_name")?,
                    services,
                    date: required_date("create_booking", &args, "date")?,
                    time: required_time("create_booking", &args, "time")?,
                    provider_name: optional_string(&args, "provider_name"),
                    notes: optional_string(&args, "notes"),
                }))
            }
            "update_booking" => {
                let parsed = UpdateBookingArgs {
                    new_date: optional_date("update_booking", &args, "new_date")?,
                    new_time: optional_time("update_booking", &args, "new_time")?,
                    new_services: optional_string_list("update_booking", &args, "new_services")?,
                    new_provider_name: optional_string(&args, "new_provider_name"),
                };
                if parsed == UpdateBookingArgs::default() {
                    return Err(CommandParseError::MissingField {
                        command: "update_booking",
                        field: "new_date|new_time|new_services|new_provider_name",
                    });
                }
                Ok(Self::UpdateBooking(parsed))
            }
            "cancel_booking" => Ok(Self::CancelBooking(CancelBookingArgs {
                reason: optional_string(&args, "reason"),
            })),
            "get_appointments" => Ok(Self::GetAppointments),
            "reply" => Ok(Self::Reply { text: required_string("reply", &args, "text")? }),
            other => Err(CommandParseError::UnknownCommand(other.to_string())),
        }
    }
}

fn required_string(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<String, CommandParseError> {
    optional_string(args, field).ok_or(CommandParseError::MissingField { command, field })
}

fn optional_string(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

fn required_string_list(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<Vec<String>, CommandParseError> {
    optional_string_list(command, args, field)?
        .filter(|items| !items.is_empty())
        .ok_or(CommandParseError::MissingField { command, field })
}

fn optional_string_list(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<Option<Vec<String>>, CommandParseError> {
    let Some(value) = args.get(field) else {
        return Ok(None);
    };

    match value {
        Value::Array(items) => {
            let mut parsed = Vec::with_capacity(items.len());
            for item in items {
                let Some(text) = item.as_str().map(str::trim).filter(|text| !text.is_empty())
                else {
                    return Err(CommandParseError::InvalidField {
                        command,
                        field,
                        detail: "expected non-empty strings".to_string(),
                    });
                };
                parsed.push(text.to_owned());
            }
            Ok(Some(parsed))
        }
        // Comma-separated fallback; models drift between the two shapes.
        Value::String(raw) => {
            let parsed: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
                .collect();
            Ok((!parsed.is_empty()).then_some(parsed))
        }
        _ => Err(CommandParseError::InvalidField {
            command,
            field,
            detail: "expected a list of strings".to_string(),
        }),
    }
}

fn required_date(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<NaiveDate, CommandParseError> {
    optional_date(command, args, field)?
        .ok_or(CommandParseError::MissingField { command, field })
}

fn optional_date(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<Option<NaiveDate>, CommandParseError> {
    let Some(raw) = optional_string(args, field) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map(Some).map_err(|_| {
        CommandParseError::InvalidField {
            command,
            field,
            detail: format!("`{raw}` is not a YYYY-MM-DD date"),
        }
    })
}

fn required_time(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<NaiveTime, CommandParseError> {
    optional_time(command, args, field)?
        .ok_or(CommandParseError::MissingField { command, field })
}

fn optional_time(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<Option<NaiveTime>, CommandParseError> {
    let Some(raw) = optional_string(args, field) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(&raw, "%H:%M").map(Some).map_err(|_| {
        CommandParseError::InvalidField {
            command,
            field,
            detail: format!("`{raw}` is not an HH:MM time"),
        }
    })
}

fn optional_u32(
    command: &'static str,
    args: &Value,
    field: &'static str,
) -> Result<Option<u32>, CommandParseError> {
    let Some(value) = args.get(field) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_u64()
        .and_then(|number| u32::try_from(number).ok())
        .filter(|number| *number > 0)
        .map(Some)
        .ok_or(CommandParseError::InvalidField {
            command,
            field,
            detail: "expected a positive integer".to_string(),
        })
}
