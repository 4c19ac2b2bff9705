//! CLI for wardens and operators

use clap::{Parser, Subcommand};
use roomalloc::coordinator::records::{Gender, GenderPolicy};
use roomalloc::coordinator::review::NewApplication;
use roomalloc::coordinator::rooms::NewRoom;
use roomalloc::coordinator::{Allocation, Application, Room};
use roomalloc::ops::ApiClient;

#[derive(Parser)]
#[command(name = "roomalloc")]
#[command(about = "roomalloc hostel room allocation CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:5000")]
    coordinator: String,

    /// Acting warden or student, sent as X-Actor-Id
    #[arg(long, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage rooms
    Room {
        #[command(subcommand)]
        command: RoomCommands,
    },

    /// Manage applications
    Application {
        #[command(subcommand)]
        command: ApplicationCommands,
    },

    /// Allocate a bed to an application
    Allocate {
        application_id: String,
        room_id: String,

        /// Bed label within the room
        #[arg(long)]
        bed: Option<String>,
    },

    /// Cancel an allocation and release its bed
    Cancel { allocation_id: String },

    /// List allocations
    Allocations {
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        room: Option<String>,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long)]
        hostel: Option<String>,
        /// active or cancelled
        #[arg(long)]
        status: Option<String>,
    },

    /// Occupancy report for a hostel
    Occupancy { hostel_id: String },

    /// Verify occupancy counters against allocations
    Verify,
}

#[derive(Subcommand)]
enum RoomCommands {
    /// Register a room
    Create {
        #[arg(long)]
        hostel: String,
        #[arg(long)]
        number: String,
        #[arg(long)]
        capacity: u32,
        #[arg(long)]
        block: Option<String>,
        #[arg(long)]
        floor: Option<i32>,
        /// Comma-separated amenities
        #[arg(long, value_delimiter = ',')]
        amenities: Vec<String>,
        /// Hostel gender policy: male, female or mixed
        #[arg(long, default_value = "mixed")]
        gender: GenderPolicy,
    },

    /// List rooms
    List {
        #[arg(long)]
        hostel: Option<String>,
        /// Only rooms with a free bed
        #[arg(long)]
        available: bool,
    },
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// Submit an application
    Submit {
        #[arg(long)]
        student: String,
        #[arg(long)]
        semester: String,
        /// Comma-separated preferences
        #[arg(long, value_delimiter = ',')]
        preferences: Vec<String>,
        /// male or female; required for single-gender hostels
        #[arg(long)]
        gender: Option<Gender>,
    },

    /// List applications
    List {
        /// pending, approved, rejected or allocated
        #[arg(long)]
        status: Option<String>,
    },

    /// Approve a pending application
    Approve { id: String },

    /// Reject a pending application
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
}

fn print_room(room: &Room) {
    println!(
        "{}  {}/{}  {}/{} occupied  {}",
        room.id, room.hostel_id, room.room_number, room.occupied, room.capacity, room.gender_policy
    );
}

fn print_application(app: &Application) {
    println!(
        "{}  student={} semester={} status={}",
        app.id, app.student_id, app.semester, app.status
    );
}

fn print_allocation(allocation: &Allocation) {
    println!(
        "{}  student={} room={} ({}) bed={} status={}",
        allocation.id,
        allocation.student_id,
        allocation.room_id,
        allocation.room.room_number,
        allocation.bed_label.as_deref().unwrap_or("-"),
        allocation.status
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = ApiClient::new(cli.coordinator, cli.actor);

    match cli.command {
        Commands::Room { command } => match command {
            RoomCommands::Create {
                hostel,
                number,
                capacity,
                block,
                floor,
                amenities,
                gender,
            } => {
                let room = client
                    .create_room(&NewRoom {
                        id: None,
                        room_number: number,
                        hostel_id: hostel,
                        capacity,
                        block,
                        floor,
                        condition: None,
                        amenities,
                        gender_policy: gender,
                    })
                    .await?;
                print_room(&room);
            }
            RoomCommands::List { hostel, available } => {
                for room in client.list_rooms(hostel.as_deref(), available).await? {
                    print_room(&room);
                }
            }
        },

        Commands::Application { command } => match command {
            ApplicationCommands::Submit {
                student,
                semester,
                preferences,
                gender,
            } => {
                let app = client
                    .submit_application(&NewApplication {
                        student_id: student,
                        semester,
                        preferences,
                        gender,
                    })
                    .await?;
                print_application(&app);
            }
            ApplicationCommands::List { status } => {
                for app in client.list_applications(status.as_deref()).await? {
                    print_application(&app);
                }
            }
            ApplicationCommands::Approve { id } => {
                print_application(&client.approve_application(&id).await?);
            }
            ApplicationCommands::Reject { id, reason } => {
                print_application(&client.reject_application(&id, &reason).await?);
            }
        },

        Commands::Allocate {
            application_id,
            room_id,
            bed,
        } => {
            let allocation = client
                .allocate(&application_id, &room_id, bed.as_deref())
                .await?;
            print_allocation(&allocation);
        }

        Commands::Cancel { allocation_id } => {
            print_allocation(&client.cancel(&allocation_id).await?);
        }

        Commands::Allocations {
            student,
            room,
            semester,
            hostel,
            status,
        } => {
            let query: Vec<(&str, String)> = [
                ("student_id", student),
                ("room_id", room),
                ("semester", semester),
                ("hostel_id", hostel),
                ("status", status),
            ]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
            for allocation in client.list_allocations(&query).await? {
                print_allocation(&allocation);
            }
        }

        Commands::Occupancy { hostel_id } => {
            let report = client.occupancy(&hostel_id).await?;
            println!("Occupancy of {}:", report.hostel_id);
            println!("  Rooms: {}", report.total_rooms);
            println!("  Capacity: {}", report.total_capacity);
            println!("  Occupied: {}", report.occupied);
            println!("  Available: {}", report.available);
            println!("  Occupancy rate: {:.2}%", report.occupancy_rate);
        }

        Commands::Verify => {
            let result = client.verify().await?;
            println!("Verification report:");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
