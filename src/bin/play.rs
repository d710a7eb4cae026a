use std::io::{self, Write};
use std::time::Duration;

use chess::{Color, File, Piece, Rank, Square};
use clap::{Arg, Command};

use chatchess::agent::{HttpAgent, DEFAULT_BASE_URL};
use chatchess::arbiter::{
    Arbitrator, BoardObserver, GameConfig, GameSession, HumanAction, HumanInput, SessionEvent,
};
use chatchess::board::GameBoard;
use chatchess::engine::UciFallback;

fn main() {
    env_logger::init();

    let matches = Command::new("chatchess")
        .about("Play chess against a language model, with a UCI engine as its safety net")
        .arg(
            Arg::new("engine")
                .long("engine")
                .value_name("PATH")
                .help("UCI engine binary used for fallback moves")
                .default_value("stockfish"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("MODEL")
                .help("Model identifier sent to the agent endpoint")
                .default_value("gpt-4.1-mini"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .value_name("URL")
                .help("OpenAI-compatible endpoint base URL")
                .default_value(DEFAULT_BASE_URL),
        )
        .arg(
            Arg::new("agent-timeout")
                .long("agent-timeout")
                .value_name("SECONDS")
                .help("Bound on each agent request")
                .value_parser(clap::value_parser!(u64).range(1..=600))
                .default_value("30"),
        )
        .arg(
            Arg::new("engine-timeout")
                .long("engine-timeout")
                .value_name("SECONDS")
                .help("Bound on each fallback search")
                .value_parser(clap::value_parser!(u64).range(1..=600))
                .default_value("60"),
        )
        .get_matches();

    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("OPENAI_API_KEY is not set; the agent endpoint needs it.");
            std::process::exit(1);
        }
    };

    let agent = HttpAgent::new(
        matches.get_one::<String>("model").unwrap().clone(),
        api_key,
    )
    .base_url(matches.get_one::<String>("base-url").unwrap().clone())
    .timeout(Duration::from_secs(
        *matches.get_one::<u64>("agent-timeout").unwrap(),
    ));

    let fallback = UciFallback::new(matches.get_one::<String>("engine").unwrap())
        .move_timeout(Duration::from_secs(
            *matches.get_one::<u64>("engine-timeout").unwrap(),
        ));

    let arbitrator = Arbitrator::new(&agent, &fallback);

    println!("Welcome to chatchess! Play against a language model that checks the");
    println!("board through a tool, with a UCI engine covering its mistakes.");

    let mut input = TerminalInput;
    let mut observer = TerminalBoard;
    let mut session = GameSession::new(prompt_config());

    loop {
        match arbitrator.run(&mut session, &mut input, &mut observer) {
            SessionEvent::GameOver(outcome) => {
                println!("\nGame over: {outcome}");
                break;
            }
            SessionEvent::ResetRequested => {
                println!("Starting a new game.");
                session = GameSession::new(prompt_config());
            }
            SessionEvent::QuitRequested => {
                println!("Goodbye!");
                break;
            }
            SessionEvent::EngineFailed(e) => {
                eprintln!("The fallback engine failed: {e}");
                match prompt_line("Retry the turn, new game, or quit? (r/n/q): ").as_str() {
                    "n" => session = GameSession::new(prompt_config()),
                    "q" => break,
                    // Retrying just runs the same pending turn again.
                    _ => {}
                }
            }
        }
    }
}

fn prompt_line(prompt: &str) -> String {
    print!("{prompt}");
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return "quit".to_string();
    }
    line.trim().to_lowercase()
}

fn prompt_config() -> GameConfig {
    let human_color = loop {
        match prompt_line("Play as white or black? (w/b): ").as_str() {
            "w" => break Color::White,
            "b" => break Color::Black,
            _ => println!("Please enter 'w' or 'b'."),
        }
    };
    loop {
        let raw = prompt_line("Fallback search depth (3-50): ");
        match raw.parse::<u32>() {
            Ok(depth) => match GameConfig::new(human_color, depth) {
                Ok(config) => break config,
                Err(e) => println!("{e}."),
            },
            Err(_) => println!("Depth must be a number between 3 and 50."),
        }
    }
}

struct TerminalInput;

impl HumanInput for TerminalInput {
    fn read_action(&mut self, _board: &GameBoard) -> HumanAction {
        match prompt_line("Your move (e.g. e2e4), 'new' or 'quit': ").as_str() {
            "new" => HumanAction::NewSession,
            "quit" => HumanAction::Quit,
            mv => HumanAction::Move(mv.to_string()),
        }
    }
}

struct TerminalBoard;

impl BoardObserver for TerminalBoard {
    fn show(&mut self, board: &GameBoard) {
        print_board(board);
    }

    fn notice(&mut self, text: &str) {
        println!("! {text}");
    }
}

fn print_board(board: &GameBoard) {
    let position = board.position();
    println!("    a   b   c   d   e   f   g   h");
    println!("  ┌───┬───┬───┬───┬───┬───┬───┬───┐");
    for rank in (0..8).rev() {
        print!("{} │", rank + 1);
        for file in 0..8 {
            let square = Square::make_square(Rank::from_index(rank), File::from_index(file));
            let glyph = match (position.piece_on(square), position.color_on(square)) {
                (Some(piece), Some(color)) => piece_glyph(piece, color),
                _ => ' ',
            };
            print!(" {glyph} │");
        }
        println!(" {}", rank + 1);
        if rank > 0 {
            println!("  ├───┼───┼───┼───┼───┼───┼───┼───┤");
        }
    }
    println!("  └───┴───┴───┴───┴───┴───┴───┴───┘");
    println!("    a   b   c   d   e   f   g   h");
    println!();
}

fn piece_glyph(piece: Piece, color: Color) -> char {
    match (color, piece) {
        (Color::White, Piece::King) => '♔',
        (Color::White, Piece::Queen) => '♕',
        (Color::White, Piece::Rook) => '♖',
        (Color::White, Piece::Bishop) => '♗',
        (Color::White, Piece::Knight) => '♘',
        (Color::White, Piece::Pawn) => '♙',
        (Color::Black, Piece::King) => '♚',
        (Color::Black, Piece::Queen) => '♛',
        (Color::Black, Piece::Rook) => '♜',
        (Color::Black, Piece::Bishop) => '♝',
        (Color::Black, Piece::Knight) => '♞',
        (Color::Black, Piece::Pawn) => '♟',
    }
}
