use super::*;
use chrono::Utc;
use proptest::prelude::*;
use shared::domain::{EntryKind, LobbyCode, Player};

fn waiting_lobby(n: usize) -> Lobby {
    let now = Utc::now();
    let ids: Vec<PlayerId> = (0..n).map(|i| PlayerId(format!("p{i}"))).collect();
    Lobby {
        code: LobbyCode::from("TEST22"),
        players: ids
            .iter()
            .enumerate()
            .map(|(i, id)| Player {
                id: id.clone(),
                name: format!("Player {i}"),
                is_leader: i == 0,
            })
            .collect(),
        player_order: ids.clone(),
        leader_id: ids[0].clone(),
        status: LobbyStatus::Waiting,
        created_at: now,
        expires_at: now,
    }
}

fn pack_ids(n: usize) -> Vec<PackId> {
    (0..n).map(|i| PackId(format!("k{i}"))).collect()
}

fn entry(player: &PlayerId, kind: EntryKind) -> Entry {
    Entry {
        kind,
        content: format!("from {player}"),
        player_id: player.clone(),
        player_name: player.to_string(),
        timestamp: Utc::now(),
    }
}

fn pack_of<'a>(progress: &'a [PlayerProgress], player: &str) -> &'a str {
    progress
        .iter()
        .find(|p| p.player_id.as_str() == player)
        .map(|p| p.current_pack_id.as_str())
        .expect("player present")
}

#[test]
fn initialize_assigns_own_pack_in_player_order() {
    let mut lobby = waiting_lobby(3);
    lobby.player_order.reverse();
    let NewGame { game, progress } = initialize_game(&lobby, pack_ids(3), 3).expect("start");

    assert_eq!(game.total_rounds, 3);
    assert_eq!(game.current_round, 1);
    assert_eq!(game.round_type, RoundType::Write);
    assert_eq!(game.status, GameStatus::Playing);
    let starters: Vec<&str> = game
        .packs
        .iter()
        .map(|p| p.starting_player_id.as_str())
        .collect();
    assert_eq!(starters, vec!["p2", "p1", "p0"]);
    assert_eq!(pack_of(&progress, "p2"), "k0");
    assert_eq!(pack_of(&progress, "p0"), "k2");
    assert!(progress.iter().all(|p| !p.has_submitted));
    assert!(assignments_are_bijective(&game, &progress));
}

#[test]
fn initialize_rejects_small_or_started_lobbies() {
    let err = initialize_game(&waiting_lobby(2), pack_ids(2), 3).unwrap_err();
    assert_eq!(
        err,
        EngineError::NotEnoughPlayers {
            required: 3,
            actual: 2
        }
    );
    assert_eq!(ApiError::from(err).code, ErrorCode::PreconditionFailed);

    let mut lobby = waiting_lobby(3);
    lobby.status = LobbyStatus::Playing;
    assert_eq!(
        initialize_game(&lobby, pack_ids(3), 3).unwrap_err(),
        EngineError::AlreadyStarted
    );
}

#[test]
fn three_player_round_advances_and_rotates_left() {
    let NewGame {
        mut game,
        mut progress,
    } = initialize_game(&waiting_lobby(3), pack_ids(3), 3).expect("start");

    for (i, player) in ["p0", "p1"].into_iter().enumerate() {
        let id = PlayerId::from(player);
        let outcome =
            submit_entry(&mut game, &mut progress, &id, entry(&id, EntryKind::Text)).expect("ok");
        assert_eq!(outcome, RoundOutcome::Waiting { remaining: 2 - i });
    }
    let last = PlayerId::from("p2");
    let outcome =
        submit_entry(&mut game, &mut progress, &last, entry(&last, EntryKind::Text)).expect("ok");

    assert_eq!(
        outcome,
        RoundOutcome::Advanced {
            round: 2,
            round_type: RoundType::Draw
        }
    );
    assert!(outcome.all_submitted());
    assert_eq!(pack_of(&progress, "p0"), "k1");
    assert_eq!(pack_of(&progress, "p1"), "k2");
    assert_eq!(pack_of(&progress, "p2"), "k0");
    assert!(progress.iter().all(|p| !p.has_submitted));
    assert!(game.packs.iter().all(|p| p.entries.len() == 1));
}

#[test]
fn double_submission_is_a_conflict_and_changes_nothing() {
    let NewGame {
        mut game,
        mut progress,
    } = initialize_game(&waiting_lobby(3), pack_ids(3), 3).expect("start");
    let id = PlayerId::from("p1");
    submit_entry(&mut game, &mut progress, &id, entry(&id, EntryKind::Text)).expect("first");

    let before = (game.clone(), progress.clone());
    let err = submit_entry(&mut game, &mut progress, &id, entry(&id, EntryKind::Text)).unwrap_err();
    assert_eq!(err, EngineError::AlreadySubmitted(1));
    assert_eq!(ApiError::from(err).code, ErrorCode::Conflict);
    assert_eq!((game, progress), before);
}

#[test]
fn unknown_player_and_pack_are_not_found() {
    let NewGame {
        mut game,
        mut progress,
    } = initialize_game(&waiting_lobby(3), pack_ids(3), 3).expect("start");
    let stranger = PlayerId::from("zz");
    let err = submit_entry(
        &mut game,
        &mut progress,
        &stranger,
        entry(&stranger, EntryKind::Text),
    )
    .unwrap_err();
    assert_eq!(ApiError::from(err).code, ErrorCode::NotFound);

    progress[0].current_pack_id = PackId::from("gone");
    let id = progress[0].player_id.clone();
    let err = submit_entry(&mut game, &mut progress, &id, entry(&id, EntryKind::Text)).unwrap_err();
    assert_eq!(err, EngineError::UnknownPack(PackId::from("gone")));
}

#[test]
fn final_round_finishes_and_rejects_more_entries() {
    let NewGame {
        mut game,
        mut progress,
    } = initialize_game(&waiting_lobby(3), pack_ids(3), 3).expect("start");

    let mut last = RoundOutcome::Waiting { remaining: 3 };
    for round in 1..=3u32 {
        let kind = if RoundType::for_round(round) == RoundType::Write {
            EntryKind::Text
        } else {
            EntryKind::Drawing
        };
        assert_eq!(game.round_type, RoundType::for_round(round));
        for player in ["p0", "p1", "p2"] {
            let id = PlayerId::from(player);
            last = submit_entry(&mut game, &mut progress, &id, entry(&id, kind)).expect("submit");
        }
    }

    assert_eq!(last, RoundOutcome::Finished);
    assert_eq!(game.status, GameStatus::Finished);
    assert_eq!(game.current_round, 3);
    for pack in &game.packs {
        assert_eq!(pack.entries.len(), 3);
        assert_eq!(pack.entries[0].player_id, pack.starting_player_id);
        let authors: HashSet<&PlayerId> = pack.entries.iter().map(|e| &e.player_id).collect();
        assert_eq!(authors.len(), 3);
    }

    let id = PlayerId::from("p0");
    let err = submit_entry(&mut game, &mut progress, &id, entry(&id, EntryKind::Text)).unwrap_err();
    assert_eq!(err, EngineError::GameFinished);
    assert_eq!(ApiError::from(err).code, ErrorCode::Conflict);
}

#[test]
fn rotation_is_atomic_when_a_pack_is_missing() {
    let NewGame { game, mut progress } =
        initialize_game(&waiting_lobby(3), pack_ids(3), 3).expect("start");
    progress[2].current_pack_id = PackId::from("gone");
    let before = progress.clone();
    assert!(rotate_packs(&game, &mut progress).is_err());
    assert_eq!(progress, before);
}

proptest! {
    #[test]
    fn rotation_law_and_bijection_hold_for_every_round(
        players in 3usize..12,
        seed in any::<u64>(),
    ) {
        let mut lobby = waiting_lobby(players);
        // deterministic shuffle of the seating order
        let len = lobby.player_order.len();
        lobby.player_order.rotate_left((seed as usize) % len);
        if seed % 2 == 0 {
            lobby.player_order.reverse();
        }
        let NewGame { mut game, mut progress } =
            initialize_game(&lobby, pack_ids(players), 3).expect("start");
        prop_assert_eq!(game.total_rounds as usize, players);

        let start: Vec<PackId> = progress.iter().map(|p| p.current_pack_id.clone()).collect();
        for advance in 1..players {
            let before: Vec<usize> = progress
                .iter()
                .map(|p| game.pack_index(&p.current_pack_id).expect("known pack"))
                .collect();
            // submit in a seed-dependent order
            let mut order: Vec<PlayerId> = progress.iter().map(|p| p.player_id.clone()).collect();
            order.rotate_left((seed as usize + advance) % players);
            let mut outcome = RoundOutcome::Waiting { remaining: players };
            for id in &order {
                outcome = submit_entry(&mut game, &mut progress, id, entry(id, EntryKind::Text))
                    .expect("submit");
            }
            prop_assert!(outcome.all_submitted());
            prop_assert_eq!(game.current_round as usize, advance + 1);
            prop_assert_eq!(game.round_type, RoundType::for_round(game.current_round));
            prop_assert!(assignments_are_bijective(&game, &progress));
            for (slot, old) in progress.iter().zip(before) {
                prop_assert_eq!(
                    game.pack_index(&slot.current_pack_id).expect("known pack"),
                    (old + 1) % players
                );
            }
        }

        // one more rotation than the game plays brings every pack home
        rotate_packs(&game, &mut progress).expect("rotate");
        let home: Vec<PackId> = progress.iter().map(|p| p.current_pack_id.clone()).collect();
        prop_assert_eq!(home, start);
    }
}
