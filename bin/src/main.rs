//! Taiga CLI binary.
//!
//! A thin wrapper mapping command-line arguments to estimator configs and
//! printing the resulting frame. The default database path comes from the
//! `TAIGA_DATABASE_PATH` environment variable (a `.env` file is honored).

mod output;

use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taiga_db::{EvalidResolver, Fia};
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfig, EstimatorConfigV2, ModuleConfig};
use taiga_traits::validation::{validate_land_type, validate_tree_type};

#[derive(Parser)]
#[command(name = "taiga")]
#[command(about = "Design-based estimation over FIA forest inventory data", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every estimator subcommand.
#[derive(Args, Clone)]
struct CommonArgs {
    /// Database path (file = SQLite, directory = columnar store).
    /// Defaults to TAIGA_DATABASE_PATH.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Explicit EVALID(s) to estimate over.
    #[arg(long, value_delimiter = ',')]
    evalid: Vec<i64>,

    /// State FIPS code(s) to clip to.
    #[arg(long, value_delimiter = ',')]
    state: Vec<i64>,

    /// Land base: forest, timber, or all.
    #[arg(long, default_value = "forest")]
    land_type: String,

    /// Tree status: live, dead, gs, or all. The GRM commands (growth,
    /// mortality, removals, carbon-flux) treat the untouched default as
    /// "all".
    #[arg(long, default_value = "live")]
    tree_type: String,

    /// Tree-level domain predicate (e.g. "STATUSCD == 1 AND DIA >= 5.0").
    #[arg(long)]
    tree_domain: Option<String>,

    /// Area-level domain predicate (e.g. "OWNGRPCD == 40").
    #[arg(long)]
    area_domain: Option<String>,

    /// Grouping columns.
    #[arg(long, value_delimiter = ',')]
    grp_by: Vec<String>,

    /// Group by species code.
    #[arg(long)]
    by_species: bool,

    /// Group by diameter size class.
    #[arg(long)]
    by_size_class: bool,

    /// Group by derived land type.
    #[arg(long)]
    by_land_type: bool,

    /// Emit expanded totals alongside per-acre values.
    #[arg(long)]
    totals: bool,

    /// Emit variances instead of standard errors.
    #[arg(long)]
    variance: bool,

    /// Output format: text, json, or csv.
    #[arg(long, default_value = "text")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate land area.
    Area {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Estimate trees per acre.
    Tpa {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Estimate the expanded population tree count.
    TreeCount {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Estimate standing volume.
    Volume {
        #[command(flatten)]
        common: CommonArgs,

        /// Volume definition: net, gross, sound, or sawlog.
        #[arg(long, default_value = "net")]
        vol_type: String,
    },

    /// Estimate standing biomass.
    Biomass {
        #[command(flatten)]
        common: CommonArgs,

        /// Component: total, ag, bg, bole, stump, branch, or foliage.
        #[arg(long, default_value = "ag")]
        component: String,

        /// Output units: tons or kg.
        #[arg(long, default_value = "tons")]
        units: String,
    },

    /// Estimate carbon stock.
    Carbon {
        #[command(flatten)]
        common: CommonArgs,

        /// Methodology: fraction (biomass × 0.47) or columns
        /// (CARBON_AG + CARBON_BG).
        #[arg(long, default_value = "fraction")]
        method: String,
    },

    /// Estimate mean site index.
    SiteIndex {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Estimate annual mortality.
    Mortality {
        #[command(flatten)]
        common: CommonArgs,

        /// Measure: tpa, volume, biomass, carbon, sawlog, or both.
        #[arg(long, default_value = "tpa")]
        measure: String,

        /// Group by mortality agent.
        #[arg(long)]
        by_agent: bool,

        /// Group by ownership group.
        #[arg(long)]
        by_ownership: bool,
    },

    /// Estimate net annual growth.
    Growth {
        #[command(flatten)]
        common: CommonArgs,

        /// Measure: tpa, volume, biomass, carbon, or sawlog.
        #[arg(long, default_value = "volume")]
        measure: String,
    },

    /// Estimate annual removals.
    Removals {
        #[command(flatten)]
        common: CommonArgs,

        /// Measure: tpa, volume, biomass, carbon, or sawlog.
        #[arg(long, default_value = "tpa")]
        measure: String,
    },

    /// Compose the carbon flux (growth − mortality − removals).
    CarbonFlux {
        #[command(flatten)]
        common: CommonArgs,

        /// Suppress the per-component columns.
        #[arg(long)]
        net_only: bool,
    },

    /// Show the recommended EVALID for a state and metric.
    Evalid {
        /// Database path; defaults to TAIGA_DATABASE_PATH.
        #[arg(long)]
        db: Option<PathBuf>,

        /// State FIPS code.
        #[arg(long)]
        state: Option<i64>,

        /// Metric family: area, volume, tpa, growth, mortality, removals.
        #[arg(long, default_value = "volume", value_name = "METRIC")]
        r#type: String,
    },
}

fn main() {
    // A .env file may carry TAIGA_DATABASE_PATH and RUST_LOG.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Area { common } => {
            let (db, config) = prepare(&common, MetricFamily::Area)?;
            let frame = taiga_estimators::area(&db, &EstimatorConfigV2::from_base(config.base))?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Tpa { common } => {
            let (db, config) = prepare(&common, MetricFamily::Tpa)?;
            let frame = taiga_estimators::tpa(&db, &config.base)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::TreeCount { common } => {
            let (db, config) = prepare(&common, MetricFamily::TreeCount)?;
            let frame = taiga_estimators::tree_count(&db, &config.base)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Volume { common, vol_type } => {
            let (db, mut config) = prepare(&common, MetricFamily::Volume)?;
            config.module = ModuleConfig::Volume(taiga_traits::config::VolumeOptions {
                vol_type: vol_type.parse()?,
                ..Default::default()
            });
            let frame = taiga_estimators::volume(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Biomass {
            common,
            component,
            units,
        } => {
            let (db, mut config) = prepare(&common, MetricFamily::Biomass)?;
            config.module = ModuleConfig::Biomass(taiga_traits::config::BiomassOptions {
                component: component.parse()?,
                units: units.parse()?,
                ..Default::default()
            });
            let frame = taiga_estimators::biomass(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Carbon { common, method } => {
            let (db, mut config) = prepare(&common, MetricFamily::Carbon)?;
            if method == "columns" {
                config
                    .base
                    .extra_params
                    .insert("carbon_method".to_string(), serde_json::json!("columns"));
            } else if method != "fraction" {
                return Err(anyhow!("unknown carbon method '{method}'"));
            }
            let frame = taiga_estimators::carbon(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::SiteIndex { common } => {
            let (db, config) = prepare(&common, MetricFamily::SiteIndex)?;
            let frame = taiga_estimators::site_index(&db, &config.base)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Mortality {
            common,
            measure,
            by_agent,
            by_ownership,
        } => {
            let (db, mut config) = prepare_grm(&common, MetricFamily::Mortality)?;
            config.module = ModuleConfig::Mortality(taiga_traits::config::MortalityOptions {
                mortality_type: measure.parse()?,
                group_by_agent: by_agent,
                group_by_ownership: by_ownership,
                ..Default::default()
            });
            let frame = taiga_grm::mortality(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Growth { common, measure } => {
            let (db, mut config) = prepare_grm(&common, MetricFamily::Growth)?;
            config
                .base
                .extra_params
                .insert("measure".to_string(), serde_json::json!(measure));
            let frame = taiga_grm::growth(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Removals { common, measure } => {
            let (db, mut config) = prepare_grm(&common, MetricFamily::Removals)?;
            config
                .base
                .extra_params
                .insert("measure".to_string(), serde_json::json!(measure));
            let frame = taiga_grm::removals(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::CarbonFlux { common, net_only } => {
            let (db, mut config) = prepare_grm(&common, MetricFamily::Growth)?;
            config.base.extra_params.insert(
                "include_components".to_string(),
                serde_json::json!(!net_only),
            );
            let frame = taiga_grm::carbon_flux(&db, &config)?;
            output::print_frame(&frame, &common.format)
        }
        Commands::Evalid { db, state, r#type } => {
            let fia = open_database(db.as_deref())?;
            let metric = parse_metric(&r#type)?;
            let recommendation = EvalidResolver::recommend(fia.backend(), state, metric)?;
            println!("EVALID:      {}", recommendation.evalid);
            println!("End year:    {}", recommendation.end_invyr);
            println!("Type:        {}", recommendation.eval_type);
            println!("Statewide:   {}", recommendation.statewide);
            println!("Plot count:  {}", recommendation.plot_count);
            println!("Reason:      {}", recommendation.explanation);
            Ok(())
        }
    }
}

/// Open the database and translate the common arguments into a config.
fn prepare(common: &CommonArgs, metric: MetricFamily) -> Result<(Fia, EstimatorConfigV2)> {
    let mut fia = open_database(common.db.as_deref())?;

    if !common.state.is_empty() {
        fia.clip_by_state(&common.state)?;
    }
    if common.evalid.is_empty() {
        fia.clip_most_recent(metric)?;
    } else {
        fia.clip_by_evalid(&common.evalid)?;
    }

    let config = EstimatorConfig {
        grp_by: common.grp_by.clone(),
        by_species: common.by_species,
        by_size_class: common.by_size_class,
        by_land_type: common.by_land_type,
        land_type: validate_land_type(&common.land_type)?,
        tree_type: validate_tree_type(&common.tree_type)?,
        tree_domain: common.tree_domain.clone(),
        area_domain: common.area_domain.clone(),
        totals: common.totals,
        variance: common.variance,
        ..Default::default()
    };

    Ok((fia, EstimatorConfigV2::from_base(config)))
}

/// Like [`prepare`], but the GRM estimators have no live-only reading of
/// a remeasurement table, so the untouched `live` default widens to `all`.
fn prepare_grm(common: &CommonArgs, metric: MetricFamily) -> Result<(Fia, EstimatorConfigV2)> {
    let mut common = common.clone();
    if common.tree_type == "live" {
        common.tree_type = "all".to_string();
    }
    prepare(&common, metric)
}

fn open_database(path: Option<&std::path::Path>) -> Result<Fia> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::var("TAIGA_DATABASE_PATH")
            .map(PathBuf::from)
            .map_err(|_| {
                anyhow!("no database given; pass --db or set TAIGA_DATABASE_PATH")
            })?,
    };
    Fia::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn parse_metric(text: &str) -> Result<MetricFamily> {
    let metric = match text.to_lowercase().as_str() {
        "area" | "curr" | "all" => MetricFamily::Area,
        "volume" | "vol" => MetricFamily::Volume,
        "biomass" => MetricFamily::Biomass,
        "carbon" => MetricFamily::Carbon,
        "tpa" => MetricFamily::Tpa,
        "tree_count" | "count" => MetricFamily::TreeCount,
        "growth" | "grow" => MetricFamily::Growth,
        "mortality" | "mort" => MetricFamily::Mortality,
        "removals" | "remv" => MetricFamily::Removals,
        "dwm" | "down_woody" => MetricFamily::DownWoody,
        other => return Err(anyhow!("unknown metric '{other}'")),
    };
    Ok(metric)
}
