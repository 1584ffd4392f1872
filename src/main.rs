use std::{path::Path, process, sync::Arc};

use appunti::{
    application::{
        error::AppError,
        gateway::{GatewayOptions, ProviderGateway},
        notes::{NotesService, resolve_credential},
        render::{
            ExportShell, PreviewMount, RenderPipeline, RenderPipelineConfig, SessionState,
            export_raw,
        },
    },
    config,
    domain::{HtmlDocument, Provider, ProviderConfig},
    infra::{credentials::CredentialStore, error::InfraError, input, telemetry},
};
use tokio::io::AsyncWriteExt;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, user_error = error.is_user_error(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Generate(args) => run_generate(settings, args).await,
        config::Command::Preview(args) => run_preview(settings, args).await,
        config::Command::Export(args) => run_export(settings, args).await,
        config::Command::Keys(args) => run_keys(settings, args),
        config::Command::Providers => run_providers(),
    }
}

async fn run_generate(
    settings: config::Settings,
    args: config::GenerateArgs,
) -> Result<(), AppError> {
    let text = match args.input.as_deref() {
        Some(path) => input::read_text_file(path).await?,
        None => input::read_stdin().await?,
    };

    let provider = settings.gateway.provider;
    let store = CredentialStore::new(&settings.credentials.path);
    let credential = resolve_credential(provider, args.api_key.as_deref(), &store)?;
    let provider_config = ProviderConfig::new(provider, settings.gateway.model.clone(), credential);

    info!(
        target = "appunti::generate",
        provider = %provider,
        model = %provider_config.model,
        input_bytes = text.len(),
        "Generating notes"
    );

    let gateway = ProviderGateway::new(provider_config, GatewayOptions::from(&settings.gateway))?;
    let pipeline = Arc::new(RenderPipeline::new(
        PreviewMount::new(),
        RenderPipelineConfig::from(&settings.render),
    )?);
    let service = NotesService::new(Arc::new(gateway), pipeline.clone());

    let mut session = service.generate(&text).await?;
    let state = session.settled().await;
    if state != SessionState::Applied {
        warn!(
            target = "appunti::generate",
            session = %session.id(),
            state = ?state,
            "Preview did not settle"
        );
    }

    write_output(args.output.as_deref(), &pipeline.mount().snapshot()).await?;

    if let Some(path) = args.standalone.as_deref()
        && let Some(page) = pipeline.export_standalone()?
    {
        write_output(Some(path), &page).await?;
    }

    pipeline.release();
    Ok(())
}

async fn run_preview(settings: config::Settings, args: config::PreviewArgs) -> Result<(), AppError> {
    let markup = input::read_text_file(&args.file).await?;
    let pipeline = RenderPipeline::new(
        PreviewMount::new(),
        RenderPipelineConfig::from(&settings.render),
    )?;

    let mut session = pipeline.render(HtmlDocument::new(markup));
    let state = session.settled().await;
    info!(
        target = "appunti::preview",
        session = %session.id(),
        state = ?state,
        "Preview settled"
    );

    write_output(args.output.as_deref(), &pipeline.mount().snapshot()).await
}

async fn run_export(settings: config::Settings, args: config::ExportArgs) -> Result<(), AppError> {
    let document = HtmlDocument::new(input::read_text_file(&args.file).await?);

    let rendered = if args.standalone {
        ExportShell::new(
            settings.render.diagram_marker.clone(),
            settings.render.mermaid_theme.clone(),
        )
        .render(&document)?
    } else {
        export_raw(&document)
    };

    write_output(args.output.as_deref(), &rendered).await
}

fn run_keys(settings: config::Settings, args: config::KeysArgs) -> Result<(), AppError> {
    let store = CredentialStore::new(&settings.credentials.path);

    match args.command {
        config::KeysCommand::Set { provider, key } => {
            store.set(provider, &key)?;
            println!("Saved key for {provider}");
        }
        config::KeysCommand::Clear { provider } => {
            store.clear(provider)?;
            println!("Removed key for {provider}");
        }
        config::KeysCommand::List => {
            for (provider, present) in store.status()? {
                let state = if present { "stored" } else { "not set" };
                println!("{:<12} {state}", provider.as_str());
            }
        }
    }

    Ok(())
}

fn run_providers() -> Result<(), AppError> {
    for provider in Provider::ALL {
        println!(
            "{:<12} {:<32} {}",
            provider.as_str(),
            provider.default_model(),
            provider.credential_env_vars().join(", ")
        );
    }
    Ok(())
}

async fn write_output(path: Option<&Path>, contents: &str) -> Result<(), AppError> {
    match path {
        Some(path) => tokio::fs::write(path, contents)
            .await
            .map_err(InfraError::from)?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(contents.as_bytes())
                .await
                .map_err(InfraError::from)?;
            stdout.flush().await.map_err(InfraError::from)?;
        }
    }
    Ok(())
}
