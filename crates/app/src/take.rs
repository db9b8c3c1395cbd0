use anyhow::bail;
use exam_core::model::{ScoreSummary, SessionId, SessionStatus};
use exam_core::tracker::Navigation;
use services::{AttemptService, LiveSnapshot, LiveUpdate, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
  1..9        answer with that option
  n / p       next / previous question
  g <number>  go to a question
  clear       clear the current answer
  pause       stop the clock (resume to continue)
  submit      finish and score
  quit        save and leave; resume later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Answer(usize),
    Clear,
    Move(Navigation),
    Pause,
    Resume,
    Submit,
    Quit,
    Help,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim().to_ascii_lowercase();
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let input = match head {
        "n" | "next" => Input::Move(Navigation::Next),
        "p" | "prev" => Input::Move(Navigation::Previous),
        "g" | "goto" => {
            let number: usize = words.next()?.parse().ok()?;
            Input::Move(Navigation::Goto(number.checked_sub(1)?))
        }
        "clear" => Input::Clear,
        "pause" => Input::Pause,
        "resume" => Input::Resume,
        "submit" => Input::Submit,
        "q" | "quit" => Input::Quit,
        "h" | "help" | "?" => Input::Help,
        other => Input::Answer(other.parse::<usize>().ok()?.checked_sub(1)?),
    };
    Some(input)
}

fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn render(snapshot: &LiveSnapshot) {
    let session = &snapshot.session;
    let Some(question) = &snapshot.current_question else {
        return;
    };
    let selected = session
        .answer_for(question.id())
        .and_then(|record| record.selected_option);

    println!();
    println!(
        "[{}/{}] {} {}  answered {}  {} left",
        session.current_index() + 1,
        session.len(),
        question.subject(),
        question.year(),
        session.answered_count(),
        format_clock(session.remaining_secs())
    );
    println!("{}", question.prompt());
    for (index, option) in question.options().iter().enumerate() {
        let marker = if selected == Some(index) { '*' } else { ' ' };
        println!(" {marker}{}) {option}", index + 1);
    }
}

pub(crate) fn print_scores(summaries: &[ScoreSummary]) {
    println!();
    for summary in summaries {
        println!(
            "{:<24} {:>3}/{:<3} {:>3}%",
            summary.subject, summary.correct_count, summary.total_questions, summary.percentage
        );
    }
    if let Some(overall) = exam_core::model::OverallScore::from_summaries(summaries) {
        println!(
            "{:<24} {:>3}/{:<3} {:>3}%",
            "overall", overall.correct_count, overall.total_questions, overall.percentage
        );
    }
}

fn print_outcome(update: &LiveUpdate) -> anyhow::Result<bool> {
    match update {
        LiveUpdate::Status(SessionStatus::Expired) => {
            println!("\ntime is up; scoring your answers");
            Ok(false)
        }
        LiveUpdate::Scored(summaries) => {
            print_scores(summaries);
            Ok(true)
        }
        LiveUpdate::ScoringFailed(reason) => bail!("scoring failed: {reason}"),
        LiveUpdate::Status(_) => Ok(false),
    }
}

/// Drive one live session from stdin until it is submitted, expires or the
/// learner leaves.
pub async fn run(attempts: &AttemptService, id: SessionId) -> anyhow::Result<()> {
    let mut updates = attempts.subscribe(id)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");
    render(&attempts.snapshot(id).await?);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                let update = updates.borrow_and_update().clone();
                if print_outcome(&update)? || changed.is_err() {
                    return Ok(());
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    attempts.abandon(id).await?;
                    println!("saved; resume with `exam resume {id}`");
                    return Ok(());
                };
                let Some(input) = parse_input(&line) else {
                    println!("unrecognised input; type `help`");
                    continue;
                };
                match apply(attempts, id, input).await {
                    Ok(Flow::Continue) => render(&attempts.snapshot(id).await?),
                    Ok(Flow::Quiet) => {}
                    Ok(Flow::Done) => return Ok(()),
                    Err(SessionError::NotLive(_)) => {
                        // Expired between the prompt and the input.
                        let update = updates.wait_for(|u| {
                            matches!(u, LiveUpdate::Scored(_) | LiveUpdate::ScoringFailed(_))
                        }).await?.clone();
                        print_outcome(&update)?;
                        return Ok(());
                    }
                    Err(err) => println!("{err}"),
                }
            }
        }
    }
}

enum Flow {
    Continue,
    Quiet,
    Done,
}

async fn apply(attempts: &AttemptService, id: SessionId, input: Input) -> Result<Flow, SessionError> {
    match input {
        Input::Answer(option) => {
            let snapshot = attempts.snapshot(id).await?;
            if let Some(question) = snapshot.current_question {
                attempts.record_answer(id, question.id(), option).await?;
                attempts.navigate(id, Navigation::Next).await?;
            }
        }
        Input::Clear => {
            let snapshot = attempts.snapshot(id).await?;
            if let Some(question) = snapshot.current_question {
                attempts.clear_answer(id, question.id()).await?;
            }
        }
        Input::Move(target) => {
            attempts.navigate(id, target).await?;
        }
        Input::Pause => {
            attempts.pause(id).await?;
            println!("paused; type `resume` to continue");
            return Ok(Flow::Quiet);
        }
        Input::Resume => attempts.resume(id)?,
        Input::Submit => {
            let receipt = attempts.submit(id).await?;
            match receipt.scoring.await {
                Ok(Ok(summaries)) => print_scores(&summaries),
                Ok(Err(err)) => println!("scoring failed: {err}"),
                Err(err) => println!("scoring task stopped: {err}"),
            }
            return Ok(Flow::Done);
        }
        Input::Quit => {
            let session = attempts.abandon(id).await?;
            println!(
                "saved with {} left; resume with `exam resume {id}`",
                format_clock(session.remaining_secs())
            );
            return Ok(Flow::Done);
        }
        Input::Help => {
            println!("{HELP}");
            return Ok(Flow::Quiet);
        }
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_are_one_based_for_people() {
        assert_eq!(parse_input("2"), Some(Input::Answer(1)));
        assert_eq!(parse_input(" G 10 "), Some(Input::Move(Navigation::Goto(9))));
        assert_eq!(parse_input("0"), None);
        assert_eq!(parse_input("g"), None);
        assert_eq!(parse_input("submit"), Some(Input::Submit));
        assert_eq!(parse_input(""), None);
    }

    #[test]
    fn clock_is_hours_minutes_seconds() {
        assert_eq!(format_clock(7_200), "02:00:00");
        assert_eq!(format_clock(61), "00:01:01");
    }
}
