use super::{Outcome, Round, Tally};

/// Single-round count. Every configured option starts at zero; write-ins are
/// added as they appear.
pub fn calculate_results<'a, I>(options: &[String], choices: I) -> Tally
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Round = options.iter().map(|option| (option.clone(), 0)).collect();
    for choice in choices {
        *counts.entry(choice.to_string()).or_insert(0) += 1;
    }

    let outcome = leading_outcome(&counts);
    Tally {
        rounds: vec![counts],
        outcome,
    }
}

fn leading_outcome(counts: &Round) -> Outcome {
    let top = counts.values().copied().max().unwrap_or(0);
    if top == 0 {
        return Outcome::NoVotes;
    }

    let mut leaders: Vec<String> = counts
        .iter()
        .filter(|(_, votes)| **votes == top)
        .map(|(label, _)| label.clone())
        .collect();

    if leaders.len() == 1 {
        Outcome::Winner {
            label: leaders.remove(0),
            votes: top,
        }
    } else {
        Outcome::Tie { labels: leaders }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn counts_every_configured_option() {
        let tally = calculate_results(&options(&["Pass", "Fail", "Abstain"]), ["Pass", "Pass"]);

        let round = &tally.rounds[0];
        assert_eq!(round["Pass"], 2);
        assert_eq!(round["Fail"], 0);
        assert_eq!(round["Abstain"], 0);
        assert_eq!(
            tally.outcome,
            Outcome::Winner {
                label: "Pass".to_string(),
                votes: 2
            }
        );
    }

    #[test]
    fn write_ins_are_added() {
        let tally = calculate_results(&options(&["Pass", "Fail"]), ["Pass", "Bob", "Bob", "Bob"]);

        assert_eq!(tally.rounds[0]["Bob"], 3);
        assert_eq!(tally.winner(), Some("Bob"));
    }

    #[test]
    fn counts_sum_to_ballot_count() {
        let choices = ["Pass", "Fail", "Abstain", "Pass", "Write me in", "Fail", "Pass"];
        let tally = calculate_results(&options(&["Pass", "Fail", "Abstain"]), choices);

        let total: u32 = tally.rounds[0].values().sum();
        assert_eq!(total as usize, choices.len());
    }

    #[test]
    fn no_ballots() {
        let tally = calculate_results(&options(&["Pass", "Fail"]), []);

        assert_eq!(tally.rounds.len(), 1);
        assert_eq!(tally.outcome, Outcome::NoVotes);
    }

    #[test]
    fn level_leaders_tie() {
        let tally = calculate_results(&options(&["Pass", "Fail"]), ["Pass", "Fail"]);

        assert_eq!(
            tally.outcome,
            Outcome::Tie {
                labels: vec!["Fail".to_string(), "Pass".to_string()]
            }
        );
    }
}
