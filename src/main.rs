use bootimg::{
    actions::Action,
    actions::{
        create::{invoke as InvokeCreate, CreateActionArgs},
        info::{InfoAction, InfoArgs},
        insert::{InsertAction as InsertFilesAction, InsertActionArgs, Insertion},
        partitions::{ListPartitionsAction, ListPartitionsArgs},
    },
    image::Image,
    layout::LBA_SIZE,
};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct BootimgArgs {
    #[command(subcommand)]
    action: ActionCommand,

    #[arg(short, required = true)]
    image: String,
}

#[derive(Args, Debug)]
struct CreateAction {
    #[arg(long, action)]
    overwrite: bool,

    /// Copy a file into the ESP, e.g. /EFI/BOOT/BOOTX64.EFI=loader.efi
    #[arg(long, value_name = "DEST[=SOURCE]")]
    insert: Vec<String>,
}

#[derive(Args, Debug)]
struct InsertAction {
    #[arg(required = true, value_name = "DEST[=SOURCE]")]
    paths: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    Create(CreateAction),
    Insert(InsertAction),
    Info,
    Partitions {
        #[command(subcommand)]
        action: PartitionsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PartitionsAction {
    List,
}

impl From<CreateAction> for CreateActionArgs {
    fn from(value: CreateAction) -> Self {
        CreateActionArgs {
            overwrite: value.overwrite,
            insertions: value.insert.iter().map(|s| Insertion::parse(s)).collect(),
        }
    }
}

impl From<InsertAction> for InsertActionArgs {
    fn from(value: InsertAction) -> Self {
        InsertActionArgs {
            insertions: value.paths.iter().map(|s| Insertion::parse(s)).collect(),
        }
    }
}

fn open_image(path: &str) -> Result<Image> {
    Ok(Image::open(path, LBA_SIZE as usize)?)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = BootimgArgs::parse();

    match args.action {
        ActionCommand::Create(a) => InvokeCreate(&args.image, a.into())?,
        ActionCommand::Insert(a) => {
            InsertFilesAction::invoke(&mut open_image(&args.image)?, a.into())?
        }
        ActionCommand::Info => InfoAction::invoke(&mut open_image(&args.image)?, InfoArgs {})?,
        ActionCommand::Partitions {
            action: PartitionsAction::List,
        } => ListPartitionsAction::invoke(&mut open_image(&args.image)?, ListPartitionsArgs {})?,
    }

    Ok(())
}
