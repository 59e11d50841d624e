//! Embedded HTML/CSS/JS frontend for the collabdash web dashboard.
//!
//! The page is compiled into the binary as a string constant and talks only
//! to the JSON API of the same server.

/// The complete single-page dashboard HTML.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Collaborative Training Dashboard</title>
<style>
:root {
  --bg: #0d1117;
  --surface: #161b22;
  --border: #30363d;
  --text: #e6edf3;
  --text-muted: #8b949e;
  --accent: #58a6ff;
  --green: #3fb950;
  --yellow: #d29922;
  --red: #f85149;
  --radius: 8px;
  --font: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
  --mono: 'SF Mono', 'Cascadia Code', 'Fira Code', monospace;
}

* { margin: 0; padding: 0; box-sizing: border-box; }
body {
  background: var(--bg);
  color: var(--text);
  font-family: var(--font);
  font-size: 14px;
  line-height: 1.5;
}

.app { max-width: 1200px; margin: 0 auto; padding: 24px; }

header {
  display: flex;
  align-items: center;
  justify-content: space-between;
  margin-bottom: 24px;
  padding-bottom: 16px;
  border-bottom: 1px solid var(--border);
}
header h1 { font-size: 22px; font-weight: 600; }
#updated { color: var(--text-muted); font-size: 12px; }

.cards {
  display: grid;
  grid-template-columns: repeat(3, 1fr);
  gap: 16px;
  margin-bottom: 24px;
}
.card {
  background: var(--surface);
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 16px;
}
.card .label { color: var(--text-muted); font-size: 12px; text-transform: uppercase; }
.card .value { font-size: 28px; font-weight: 600; font-family: var(--mono); }

section {
  background: var(--surface);
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 16px;
  margin-bottom: 24px;
}
section h2 { font-size: 16px; margin-bottom: 12px; }

table { width: 100%; border-collapse: collapse; }
th, td { text-align: left; padding: 6px 8px; border-bottom: 1px solid var(--border); }
th { color: var(--text-muted); font-weight: 500; }
td.num { font-family: var(--mono); text-align: right; }

.participants { display: flex; flex-wrap: wrap; gap: 12px; }
.participant {
  display: flex;
  align-items: center;
  gap: 8px;
  color: var(--text);
  text-decoration: none;
}
.participant img { width: 32px; height: 32px; border-radius: 50%; }
.participant.active img { outline: 2px solid var(--green); }

svg .loss { stroke: var(--accent); fill: none; stroke-width: 1.5; }
svg .peers { stroke: var(--yellow); fill: none; stroke-width: 1.5; }
svg text { fill: var(--text-muted); font-size: 11px; }

.error { color: var(--red); }
</style>
</head>
<body>
<div class="app">
  <header>
    <h1>Collaborative Training Dashboard</h1>
    <span id="updated"></span>
    <button id="reload" type="button">Reload</button>
  </header>

  <div class="cards">
    <div class="card"><div class="label">Contributing users</div><div class="value" id="stat-users">&ndash;</div></div>
    <div class="card"><div class="label">Active users</div><div class="value" id="stat-active">&ndash;</div></div>
    <div class="card"><div class="label">Total runtime</div><div class="value" id="stat-runtime">&ndash;</div></div>
  </div>

  <section>
    <h2>Training loss and alive peers</h2>
    <svg id="loss-chart" viewBox="0 0 800 240" width="100%" height="240"></svg>
  </section>

  <section>
    <h2>Participants</h2>
    <div class="participants" id="participants"></div>
  </section>

  <section>
    <h2>Leaderboard</h2>
    <table>
      <thead><tr><th>Rank</th><th>User</th><th>Total time contributed</th></tr></thead>
      <tbody id="leaderboard"></tbody>
    </table>
  </section>
</div>

<script>
// ---------------------------------------------------------------------------
// API helpers
// ---------------------------------------------------------------------------
async function api(path) {
  const res = await fetch(path);
  const body = await res.json();
  if (!res.ok) throw new Error(body.error || res.statusText);
  return body;
}

function fmt(n) {
  if (n === undefined || n === null) return '-';
  return n.toLocaleString();
}

function esc(s) {
  if (!s) return '';
  return String(s).replace(/&/g,'&amp;').replace(/</g,'&lt;').replace(/>/g,'&gt;').replace(/"/g,'&quot;');
}

function fail(id, e) {
  document.getElementById(id).innerHTML = `<span class="error">${esc(e.message)}</span>`;
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------
async function loadMetrics() {
  try {
    const m = await api('/api/metrics');
    document.getElementById('stat-users').textContent = fmt(m.num_contributing_users);
    document.getElementById('stat-active').textContent = fmt(m.num_active_users);
    document.getElementById('stat-runtime').textContent = m.formatted_runtime;
    document.getElementById('updated').textContent =
      m.latest_timestamp ? 'last update ' + new Date(m.latest_timestamp).toLocaleString() : '';
  } catch (e) {
    fail('updated', e);
  }
}

// ---------------------------------------------------------------------------
// Leaderboard
// ---------------------------------------------------------------------------
async function loadLeaderboard() {
  try {
    const lb = await api('/api/leaderboard');
    document.getElementById('leaderboard').innerHTML = lb.rows.map(r =>
      `<tr><td>${r['Rank']}</td><td>${esc(r['User'])}</td><td class="num">${esc(r['Total time contributed'])}</td></tr>`
    ).join('');
  } catch (e) {
    fail('leaderboard', e);
  }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------
async function loadParticipants() {
  try {
    const b = await api('/api/bubbles');
    const points = b.serializedData.points[0] || [];
    const active = new Set(points.filter(p => p.activeRuns.length > 0).map(p => p.profileId));
    document.getElementById('participants').innerHTML = b.profileSimple.map(p =>
      `<a class="participant ${active.has(p.id) ? 'active' : ''}" href="${esc(p.url)}" target="_blank">` +
      `<img src="${esc(p.src)}" alt=""><span>${esc(p.name)}</span></a>`
    ).join('');
  } catch (e) {
    fail('participants', e);
  }
}

// ---------------------------------------------------------------------------
// Loss chart
// ---------------------------------------------------------------------------
function polyline(xs, ys, w, h, cls) {
  if (xs.length === 0) return '';
  const x0 = Math.min(...xs), x1 = Math.max(...xs);
  const y0 = Math.min(...ys), y1 = Math.max(...ys);
  const sx = x => 40 + (x1 === x0 ? 0 : (x - x0) / (x1 - x0)) * (w - 60);
  const sy = y => h - 20 - (y1 === y0 ? 0 : (y - y0) / (y1 - y0)) * (h - 40);
  const pts = xs.map((x, i) => `${sx(x).toFixed(1)},${sy(ys[i]).toFixed(1)}`).join(' ');
  return `<polyline class="${cls}" points="${pts}"/>`;
}

async function loadLoss() {
  const svg = document.getElementById('loss-chart');
  try {
    const h = await api('/api/loss');
    if (h.steps.length === 0) {
      svg.innerHTML = '<text x="40" y="120">no history yet</text>';
      return;
    }
    const last = h.steps.length - 1;
    svg.innerHTML =
      polyline(h.steps, h.losses, 800, 240, 'loss') +
      polyline(h.steps, h.alive_peers, 800, 240, 'peers') +
      `<text x="40" y="14">step ${h.steps[last]}: loss ${h.losses[last].toFixed(3)}, ${h.alive_peers[last]} peers</text>`;
  } catch (e) {
    svg.innerHTML = `<text x="40" y="120">${esc(e.message)}</text>`;
  }
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------
function refresh() {
  loadMetrics();
  loadLeaderboard();
  loadParticipants();
  loadLoss();
}

// Drop the server-side caches, then redraw everything.
document.getElementById('reload').addEventListener('click', async () => {
  try {
    await api('/api/metrics?refresh=1');
  } catch (e) {
    fail('updated', e);
  }
  refresh();
});

refresh();
setInterval(refresh, 60000);
</script>
</body>
</html>"##;
