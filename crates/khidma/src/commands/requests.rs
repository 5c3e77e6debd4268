//! `khidma requests` -- browse and update service requests.

use tabled::Tabled;

use khidma_core::{Marketplace, RequestRole, RequestStatus, ServiceRequest};

use crate::cli::{GlobalOpts, RequestsArgs, RequestsCommand};
use crate::error::CliError;
use crate::output::{print_output, render_list, render_single};

#[derive(Tabled)]
struct RequestRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TITLE")]
    title: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "CITY")]
    city: String,
    #[tabled(rename = "BUDGET")]
    budget: String,
}

fn to_row(request: &ServiceRequest) -> RequestRow {
    RequestRow {
        id: request.id.to_string(),
        title: request.title.clone(),
        status: request.status.label().to_owned(),
        city: request.city.clone().unwrap_or_default(),
        budget: request
            .budget
            .map_or_else(String::new, |b| format!("${b:.2}")),
    }
}

fn detail(request: &ServiceRequest) -> String {
    let mut lines = vec![
        format!("id:       {}", request.id),
        format!("title:    {}", request.title),
        format!("status:   {}", request.status.label()),
        format!("client:   {}", request.client_id),
    ];
    if let Some(ref worker) = request.worker_id {
        lines.push(format!("worker:   {worker}"));
    }
    if let Some(ref category) = request.category {
        lines.push(format!("category: {category}"));
    }
    if let Some(ref city) = request.city {
        lines.push(format!("city:     {city}"));
    }
    if let Some(budget) = request.budget {
        lines.push(format!("budget:   ${budget:.2}"));
    }
    lines.push(format!("created:  {}", request.created_at.to_rfc3339()));
    if let Some(ref description) = request.description {
        lines.push(String::new());
        lines.push(description.clone());
    }
    lines.join("\n")
}

fn parse_status(raw: &str) -> Result<RequestStatus, CliError> {
    raw.parse().map_err(|reason| CliError::Validation {
        field: "status".into(),
        reason,
    })
}

/// The command's inputs, validated before any network traffic.
enum Plan {
    List {
        status: Option<RequestStatus>,
        role: Option<RequestRole>,
    },
    Show {
        id: String,
    },
    SetStatus {
        id: String,
        status: RequestStatus,
    },
}

fn plan(command: RequestsCommand) -> Result<Plan, CliError> {
    match command {
        RequestsCommand::List {
            status,
            mine,
            assigned,
        } => Ok(Plan::List {
            status: status.as_deref().map(parse_status).transpose()?,
            role: if mine {
                Some(RequestRole::Client)
            } else if assigned {
                Some(RequestRole::Worker)
            } else {
                None
            },
        }),
        RequestsCommand::Show { id } => Ok(Plan::Show { id }),
        RequestsCommand::SetStatus { id, status } => Ok(Plan::SetStatus {
            id,
            status: parse_status(&status)?,
        }),
    }
}

pub async fn handle(
    args: RequestsArgs,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let plan = plan(args.command)?;

    marketplace.connect().await.map_err(CliError::from)?;

    let outcome = match plan {
        Plan::List { status, role } => match marketplace.list_requests(status, role).await {
            Ok(requests) => {
                let rendered = render_list(&global.output, &requests, to_row, |r| r.id.to_string());
                print_output(&rendered, global.quiet);
                Ok(())
            }
            Err(e) => Err(CliError::from(e)),
        },

        Plan::Show { id } => match marketplace.get_request(&id).await {
            Ok(request) => {
                let rendered =
                    render_single(&global.output, &request, detail, |r| r.id.to_string());
                print_output(&rendered, global.quiet);
                Ok(())
            }
            Err(e) => Err(CliError::from(e)),
        },

        Plan::SetStatus { id, status } => match marketplace.set_request_status(&id, status).await {
            Ok(()) => {
                print_output(&format!("{id} -> {}", status.label()), global.quiet);
                Ok(())
            }
            Err(e) => Err(CliError::from(e)),
        },
    };

    marketplace.disconnect().await;
    outcome
}
