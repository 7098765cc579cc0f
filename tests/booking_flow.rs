mod common;

use ulid::Ulid;

use common::*;

#[tokio::test]
async fn reservation_lifecycle_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Appartement Vue Mer").await;

    let first = Ulid::new();
    let rows = client.ok(&reservation_sql(first, listing, "2024-06-01", "2024-06-05")).await;
    assert_eq!(rows[0]["status"], "pending");
    assert_eq!(rows[0]["start_date"], "2024-06-01");
    assert_eq!(rows[0]["dates_display"], "01/06/2024 - 05/06/2024");

    // Touching the last night is a conflict.
    let reply = client.query(&reservation_sql(Ulid::new(), listing, "2024-06-05", "2024-06-07")).await;
    assert_eq!(reply["code"], "23P01");
    assert!(reply["message"].as_str().unwrap().contains("these dates are not available"));

    client.ok(&reservation_sql(Ulid::new(), listing, "2024-06-06", "2024-06-07")).await;

    client.ok(&format!("INSERT INTO reservation_status VALUES ('{first}', 'confirmed')")).await;
    assert_eq!(
        client.err(&format!("DELETE FROM reservations WHERE id = '{first}'")).await,
        "55000",
        "confirmed is terminal"
    );

    let rows = client
        .ok(&format!("SELECT * FROM reservations WHERE listing_id = '{listing}' AND status = 'confirmed'"))
        .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], first.to_string());
}

#[tokio::test]
async fn cancelled_dates_become_free() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Studio Centre").await;

    let rid = Ulid::new();
    client.ok(&reservation_sql(rid, listing, "2024-06-10", "2024-06-12")).await;
    let in_stay = format!(
        "SELECT * FROM availability WHERE listing_id = '{listing}' AND start_date = '2024-06-11' AND end_date = '2024-06-11'"
    );
    assert_eq!(client.ok(&in_stay).await[0]["available"], false);

    client.ok(&format!("DELETE FROM reservations WHERE id = '{rid}'")).await;
    assert_eq!(client.ok(&in_stay).await[0]["available"], true);
    client.ok(&reservation_sql(Ulid::new(), listing, "2024-06-10", "2024-06-12")).await;
}

#[tokio::test]
async fn calendar_queries() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Maison Calendrier").await;

    client.ok(&reservation_sql(Ulid::new(), listing, "2024-06-01", "2024-06-05")).await;
    client.ok(&reservation_sql(Ulid::new(), listing, "2024-06-06", "2024-06-08")).await;
    let cancelled = Ulid::new();
    client.ok(&reservation_sql(cancelled, listing, "2024-06-20", "2024-06-22")).await;
    client.ok(&format!("INSERT INTO reservation_status VALUES ('{cancelled}', 'cancelled')")).await;

    let blocked = client.ok(&format!("SELECT * FROM blocked_dates WHERE listing_id = '{listing}'")).await;
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked[0]["start_date"], "2024-06-01");
    assert_eq!(blocked[1]["end_date"], "2024-06-08");

    let day = |d: &str| format!("SELECT * FROM availability WHERE listing_id = '{listing}' AND date = '{d}'");
    assert_eq!(client.ok(&day("2024-06-05")).await[0]["blocked"], true);
    assert_eq!(client.ok(&day("2024-06-09")).await[0]["blocked"], false);
    assert_eq!(client.ok(&day("2024-06-21")).await[0]["blocked"], false);

    let free = client
        .ok(&format!(
            "SELECT * FROM free_dates WHERE listing_id = '{listing}' AND start_date >= '2024-05-30' AND end_date <= '2024-06-10'"
        ))
        .await;
    let windows: Vec<_> = free
        .iter()
        .map(|r| (r["start_date"].as_str().unwrap(), r["end_date"].as_str().unwrap()))
        .collect();
    assert_eq!(windows, [("2024-05-30", "2024-05-31"), ("2024-06-09", "2024-06-10")]);
}

#[tokio::test]
async fn only_published_rentals_take_reservations() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let draft = Ulid::new();
    client
        .ok(&format!("INSERT INTO listings VALUES ('{draft}', 'Brouillon', 'location', 'studio', 500)"))
        .await;
    assert_eq!(client.err(&reservation_sql(Ulid::new(), draft, "2030-01-01", "2030-01-02")).await, "55000");

    client.ok(&format!("INSERT INTO listing_status VALUES ('{draft}', 'publie')")).await;
    client.ok(&reservation_sql(Ulid::new(), draft, "2030-01-01", "2030-01-02")).await;

    let sale = Ulid::new();
    client
        .ok(&format!("INSERT INTO listings VALUES ('{sale}', 'Terrain', 'vente', 'terrain', 90000, NULL, NULL, NULL, NULL, 'publie')"))
        .await;
    assert_eq!(client.err(&reservation_sql(Ulid::new(), sale, "2030-01-01", "2030-01-02")).await, "55000");
}

#[tokio::test]
async fn bad_requests_report_codes() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Erreurs").await;

    assert_eq!(client.err("SELEKT nothing").await, "42601");
    assert_eq!(client.err("SELECT * FROM bookings").await, "42P01");
    assert_eq!(client.err(&reservation_sql(Ulid::new(), listing, "2024-06-05", "2024-06-01")).await, "22023");
    assert_eq!(client.err(&reservation_sql(Ulid::new(), Ulid::new(), "2024-06-01", "2024-06-02")).await, "P0002");
    assert_eq!(
        client
            .err(&format!("INSERT INTO reservations VALUES ('{}', '{listing}', '2024-06-01', '2024-06-02', NULL)", Ulid::new()))
            .await,
        "22023"
    );

    let id = Ulid::new();
    client.ok(&reservation_sql(id, listing, "2024-07-01", "2024-07-02")).await;
    assert_eq!(client.err(&reservation_sql(id, listing, "2024-08-01", "2024-08-02")).await, "23505");

    // The connection survives errors.
    client.ok(&format!("SELECT * FROM listings WHERE id = '{listing}'")).await;
}

#[tokio::test]
async fn oversized_line_is_rejected_then_closed() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send_raw("x".repeat(meftahi::limits::MAX_LINE_LEN + 10)).await;
    let reply = client.recv().await.expect("error reply");
    assert_eq!(reply["code"], "54000");
    assert!(client.recv().await.is_none(), "server hangs up");
}

#[tokio::test]
async fn catalog_search_and_slug_lookup() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    for (title, purpose, price, city) in [
        ("Villa Sidi Salem", "vente", 650000, "Bizerte"),
        ("Villa Sidi Salem", "vente", 700000, "Bizerte"),
        ("Studio Lac", "location", 700, "Tunis"),
        ("Duplex Marsa", "location", 1800, "La Marsa"),
    ] {
        client
            .ok(&format!(
                "INSERT INTO listings VALUES ('{}', '{title}', '{purpose}', 'villa', {price}, NULL, '{city}', 120, 3, 'publie')",
                Ulid::new()
            ))
            .await;
    }

    let reply = client
        .query("SELECT * FROM listings WHERE purpose = 'vente' AND sort = 'price_desc'")
        .await;
    assert_eq!(reply["type"], "ok");
    assert_eq!(reply["page"]["total"], 2);
    assert_eq!(reply["rows"][0]["price"], 700000);
    assert_eq!(reply["rows"][0]["slug"], "villa-sidi-salem-1");
    assert_eq!(reply["rows"][0]["price_display"], "700\u{202F}000 TND");
    assert_eq!(reply["page"]["price_range"], "650\u{202F}000 TND - 700\u{202F}000 TND");

    let rows = client.ok("SELECT * FROM listings WHERE city = 'MARSA'").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "Duplex Marsa");

    let reply = client.query("SELECT * FROM listings WHERE sort = 'price_asc' AND page = 2 AND per_page = 3").await;
    assert_eq!(reply["page"]["total_pages"], 2);
    assert_eq!(reply["rows"].as_array().unwrap().len(), 1);
    assert_eq!(reply["rows"][0]["price"], 700000);

    let rows = client.ok("SELECT * FROM listings WHERE slug = 'studio-lac'").await;
    assert_eq!(rows[0]["city"], "Tunis");
    assert!(client.ok("SELECT * FROM listings WHERE slug = 'nowhere'").await.is_empty());

    assert_eq!(client.err("SELECT * FROM listings WHERE per_page = 500").await, "54000");
    assert_eq!(client.err("SELECT * FROM listings WHERE price >= 900 AND price <= 100").await, "22023");
}

#[tokio::test]
async fn visit_requests_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Visite").await;

    let visit = Ulid::new();
    let rows = client
        .ok(&format!(
            "INSERT INTO visits VALUES ('{visit}', '{listing}', '2030-03-04T10:00', 'visiteur@example.tn')"
        ))
        .await;
    assert_eq!(rows[0]["status"], "pending");
    assert_eq!(rows[0]["duration_min"], 30);
    assert_eq!(rows[0]["scheduled_display"], "04/03/2030 à 10:00");

    client.ok(&format!("INSERT INTO visit_status VALUES ('{visit}', 'confirmed')")).await;
    client.ok(&format!("INSERT INTO visit_status VALUES ('{visit}', 'completed')")).await;
    assert_eq!(client.err(&format!("DELETE FROM visits WHERE id = '{visit}'")).await, "55000");

    let rows = client.ok(&format!("SELECT * FROM visits WHERE listing_id = '{listing}' AND status = 'completed'")).await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn delete_listing_with_active_reservation_is_refused() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "A Supprimer").await;
    let rid = Ulid::new();
    client.ok(&reservation_sql(rid, listing, "2030-05-01", "2030-05-03")).await;

    assert_eq!(client.err(&format!("DELETE FROM listings WHERE id = '{listing}'")).await, "23503");
    client.ok(&format!("DELETE FROM reservations WHERE id = '{rid}'")).await;
    client.ok(&format!("DELETE FROM listings WHERE id = '{listing}'")).await;
    assert_eq!(client.err(&format!("SELECT * FROM listings WHERE id = '{listing}'")).await, "P0002");
}

#[tokio::test]
async fn catalog_hides_unpublished_admin_sees_all() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let published = create_rental(&mut client, "Appartement Publie").await;
    let draft = Ulid::new();
    client
        .ok(&format!(
            "INSERT INTO listings VALUES ('{draft}', 'Maison Brouillon', 'vente', 'maison', 300000, NULL, 'Menzel Jemil', 140, 4, 'brouillon', \
             'Grande maison familiale', 'Rue de la Plage 12', 2, 1998)"
        ))
        .await;

    let rows = client.ok("SELECT * FROM listings").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], published.to_string());

    let rows = client.ok("SELECT * FROM admin_listings WHERE sort = 'price_desc'").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], draft.to_string());
    assert_eq!(rows[0]["description"], "Grande maison familiale");
    assert_eq!(rows[0]["address"], "Rue de la Plage 12");
    assert_eq!(rows[0]["bathrooms"], 2);
    assert_eq!(rows[0]["year_built"], 1998);
    assert_eq!(client.ok("SELECT * FROM admin_listings WHERE status = 'brouillon'").await.len(), 1);

    // Search and bathrooms run on the admin view too.
    assert_eq!(client.ok("SELECT * FROM admin_listings WHERE q = 'menzel'").await.len(), 1);
    assert_eq!(client.ok("SELECT * FROM admin_listings WHERE bathrooms = 2").await.len(), 1);
    assert!(client.ok("SELECT * FROM listings WHERE q = 'brouillon'").await.is_empty());
    assert_eq!(client.ok("SELECT * FROM listings WHERE q = 'PUBLIE'").await.len(), 1);
}

#[tokio::test]
async fn back_office_views() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let a = create_rental(&mut client, "Back Office A").await;
    let b = create_rental(&mut client, "Back Office B").await;

    let first = Ulid::new();
    client.ok(&reservation_sql(first, a, "2030-06-01", "2030-06-03")).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = Ulid::new();
    client.ok(&reservation_sql(second, b, "2030-06-01", "2030-06-03")).await;
    client.ok(&format!("INSERT INTO reservation_status VALUES ('{first}', 'confirmed')")).await;

    let rows = client.ok("SELECT * FROM reservations").await;
    let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, [second.to_string(), first.to_string()], "newest first");
    assert_eq!(client.ok("SELECT * FROM reservations WHERE status = 'pending'").await.len(), 1);

    let (past, later, sooner) = (Ulid::new(), Ulid::new(), Ulid::new());
    for (id, listing, at) in [
        (past, a, "2020-01-10T10:00"),
        (later, a, "2031-02-01T15:00"),
        (sooner, b, "2030-12-24T09:30"),
    ] {
        client
            .ok(&format!("INSERT INTO visits VALUES ('{id}', '{listing}', '{at}', 'visiteur@example.tn')"))
            .await;
    }

    let rows = client.ok("SELECT * FROM visits").await;
    let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, [past.to_string(), sooner.to_string(), later.to_string()]);
    let rows = client.ok("SELECT * FROM visits WHERE period = 'upcoming'").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], sooner.to_string());
    let rows = client.ok(&format!("SELECT * FROM visits WHERE listing_id = '{a}' AND period = 'past'")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], past.to_string());
    assert_eq!(client.err("SELECT * FROM visits WHERE period = 'someday'").await, "42601");

    let draft = Ulid::new();
    client
        .ok(&format!("INSERT INTO listings VALUES ('{draft}', 'Brouillon Stats', 'vente', 'studio', 90000)"))
        .await;
    let stats = client.ok("SELECT * FROM stats").await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["total_listings"], 3);
    assert_eq!(stats[0]["published_listings"], 2);
    assert_eq!(stats[0]["pending_reservations"], 1);
    assert_eq!(stats[0]["upcoming_visits"], 2);
}

#[tokio::test]
async fn writes_after_delete_report_not_found() {
    let (addr, engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let listing = create_rental(&mut client, "Deja Vendu").await;
    client.ok(&format!("DELETE FROM listings WHERE id = '{listing}'")).await;

    assert_eq!(client.err(&reservation_sql(Ulid::new(), listing, "2030-01-01", "2030-01-02")).await, "P0002");
    assert_eq!(
        client
            .err(&format!("INSERT INTO visits VALUES ('{}', '{listing}', '2030-03-04T10:00', 'v@example.tn')", Ulid::new()))
            .await,
        "P0002"
    );
    assert_eq!(client.err(&format!("INSERT INTO listing_status VALUES ('{listing}', 'publie')")).await, "P0002");
    assert!(engine.reservations(listing, None).await.is_err());
}
